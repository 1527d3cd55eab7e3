use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use base64::Engine;
use tokio::time::sleep;

use crate::{
    browser::{Browser, Page},
    config::{AuthConfig, CrawlerConfig},
    types::CrawlerError,
    utils,
};

/// Loads pages through the browser backend with a per-navigation timeout
/// and a fixed number of fixed-delay retries. Intentionally no
/// exponential backoff: simple and bounded.
pub struct PageFetcher {
    browser: Arc<dyn Browser>,
    timeout: Duration,
    retry_attempts: usize,
    retry_delay: Duration,
    wait_for_selector: Option<String>,
    settle_delay: Option<Duration>,
    screenshot_on_error: bool,
    output_dir: PathBuf,
}

impl PageFetcher {
    pub fn new(browser: Arc<dyn Browser>, config: &CrawlerConfig) -> Self {
        PageFetcher {
            browser,
            timeout: config.timeout(),
            retry_attempts: config.retry_attempts.max(1),
            retry_delay: config.retry_delay(),
            wait_for_selector: config.wait_for_selector.clone(),
            settle_delay: config.settle_delay(),
            screenshot_on_error: config.screenshot_on_error,
            output_dir: config.output_dir.clone(),
        }
    }

    /// Navigates to `url`, retrying up to the configured attempt count.
    /// After the last attempt fails the error propagates as `PageLoad`
    /// carrying the URL; a best-effort diagnostic screenshot is captured
    /// first when enabled.
    pub async fn navigate(&self, url: &str) -> Result<Box<dyn Page>, CrawlerError> {
        let mut last_err = None;
        for attempt in 1..=self.retry_attempts {
            match self.attempt(url).await {
                Ok(page) => return Ok(page),
                Err((e, page)) => {
                    warn!(
                        "attempt {}/{} for {} failed: {:#}",
                        attempt, self.retry_attempts, url, e
                    );
                    if attempt == self.retry_attempts {
                        self.capture_failure(url, page).await;
                    } else if let Some(page) = page {
                        page.close().await;
                    }
                    last_err = Some(e);
                }
            }
            if attempt < self.retry_attempts {
                sleep(self.retry_delay).await;
            }
        }
        Err(CrawlerError::PageLoad {
            url: url.into(),
            message: format!("{:#}", last_err.expect("at least one attempt ran")),
        })
    }

    /// One navigation attempt. The page handle is returned alongside the
    /// error when it exists so the caller can screenshot the partial load.
    async fn attempt(
        &self,
        url: &str,
    ) -> Result<Box<dyn Page>, (anyhow::Error, Option<Box<dyn Page>>)> {
        let page = match self.browser.new_page().await {
            Ok(page) => page,
            Err(e) => return Err((e.context("could not open page"), None)),
        };

        if let Err(e) = page.goto(url, self.timeout).await {
            return Err((e, Some(page)));
        }

        // optional post-navigation wait: a selector condition or a fixed
        // settle delay, whichever the crawl configured
        if let Some(selector) = &self.wait_for_selector {
            if let Err(e) = page.wait_for_selector(selector, self.timeout).await {
                return Err((e, Some(page)));
            }
        } else if let Some(delay) = self.settle_delay {
            sleep(delay).await;
        }

        Ok(page)
    }

    /// Diagnostics never mask the original error: every failure here is
    /// logged and swallowed.
    async fn capture_failure(&self, url: &str, page: Option<Box<dyn Page>>) {
        let page = match page {
            Some(page) => page,
            None => return,
        };
        if self.screenshot_on_error {
            match page.screenshot().await {
                Ok(png) => {
                    let path = utils::screenshot_path(&self.output_dir, url);
                    let write = async {
                        if let Some(dir) = path.parent() {
                            tokio::fs::create_dir_all(dir).await?;
                        }
                        tokio::fs::write(&path, &png).await
                    };
                    match write.await {
                        Ok(_) => debug!("saved failure screenshot to {:?}", path),
                        Err(e) => warn!("could not save screenshot for {}: {}", url, e),
                    }
                }
                Err(e) => warn!("could not capture screenshot for {}: {}", url, e),
            }
        }
        page.close().await;
    }
}

/// Establishes the authenticated session once, before any navigation.
/// A failure here is fatal to the crawl: no page can be fetched without it.
pub async fn establish_session(
    browser: &dyn Browser,
    auth: &AuthConfig,
    timeout: Duration,
) -> Result<()> {
    match auth {
        AuthConfig::Cookies { cookies } => {
            browser
                .set_cookies(cookies.clone())
                .await
                .context("cookie injection failed")?;
        }
        AuthConfig::Basic { username, password } => {
            let token = base64::engine::general_purpose::STANDARD
                .encode(format!("{}:{}", username, password));
            browser
                .set_default_headers(vec![("Authorization".into(), format!("Basic {}", token))])
                .await
                .context("basic auth setup failed")?;
        }
        AuthConfig::Bearer { token } => {
            browser
                .set_default_headers(vec![("Authorization".into(), format!("Bearer {}", token))])
                .await
                .context("bearer token setup failed")?;
        }
        AuthConfig::Form {
            login_url,
            username_selector,
            password_selector,
            submit_selector,
            username,
            password,
        } => {
            let page = browser.new_page().await.context("login page failed")?;
            let login = async {
                page.goto(login_url, timeout).await?;
                page.fill(username_selector, username).await?;
                page.fill(password_selector, password).await?;
                page.click(submit_selector).await?;
                // give the post-submit navigation a moment to settle
                sleep(Duration::from_secs(1)).await;
                Ok::<(), anyhow::Error>(())
            }
            .await;
            page.close().await;
            login.with_context(|| format!("form login at {} failed", login_url))?;
            info!("login session established at {}", login_url);
        }
    }
    Ok(())
}
