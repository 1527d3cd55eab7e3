use std::{collections::HashMap, sync::Arc, sync::Mutex, time::Duration};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Network::CookieParam;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{browser::default_executable, Browser as ChromeProcess, LaunchOptions, Tab};
use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};
use tokio::task;

use crate::browser::{Browser, Element, Page};
use crate::config::SessionCookie;

/// Browser backend driving a real Chrome process over CDP. The process
/// is shared for the whole crawl session: auth cookies and headers are
/// recorded once and applied to every tab, tabs themselves are owned by
/// a single in-flight fetch each.
pub struct ChromeBrowser {
    browser: ChromeProcess,
    headers: Mutex<Vec<(String, String)>>,
    cookies: Mutex<Vec<SessionCookie>>,
}

impl ChromeBrowser {
    pub fn launch(headless: bool) -> Result<Self> {
        let is_docker = std::env::var("IN_DOCKER").is_ok();
        let options = LaunchOptions::default_builder()
            .path(Some(default_executable().map_err(|e| anyhow!(e))?))
            .window_size(Some((1920, 1080)))
            // long enough to survive paced gaps between fetches
            .idle_browser_timeout(Duration::from_secs(90))
            .headless(headless)
            // warning only do this if in docker env
            .sandbox(!is_docker)
            .build()
            .context("could not assemble chrome launch options")?;
        let browser = ChromeProcess::new(options).context("browser launching error")?;

        Ok(ChromeBrowser {
            browser,
            headers: Mutex::new(vec![]),
            cookies: Mutex::new(vec![]),
        })
    }

    pub fn kill(&self) -> bool {
        let pid = match self.browser.get_process_id() {
            Some(pid) => pid,
            None => return false,
        };
        let s = System::new();
        if let Some(process) = s.process(Pid::from_u32(pid)) {
            debug!("killing browser process with id {}", pid);
            process.kill();
            return true;
        }
        false
    }
}

impl Drop for ChromeBrowser {
    fn drop(&mut self) {
        debug!("killing browser process...");
        self.kill();
    }
}

#[async_trait]
impl Browser for ChromeBrowser {
    async fn new_page(&self) -> Result<Box<dyn Page>> {
        let browser = self.browser.clone();
        let headers = self.headers.lock().expect("headers lock poisoned").clone();
        let cookies = self.cookies.lock().expect("cookies lock poisoned").clone();

        let tab = task::spawn_blocking(move || -> Result<Arc<Tab>> {
            // tabs share the default context so a session established by
            // form login or cookie injection is visible to every fetch
            let tab = browser.new_tab().context("could not create new tab")?;
            if !headers.is_empty() {
                let map: HashMap<&str, &str> = headers
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                tab.set_extra_http_headers(map)
                    .context("could not set session headers")?;
            }
            if !cookies.is_empty() {
                tab.set_cookies(cookies.iter().map(cookie_param).collect())
                    .context("could not set session cookies")?;
            }
            Ok(tab)
        })
        .await??;

        Ok(Box::new(ChromeTab { tab }))
    }

    async fn set_cookies(&self, cookies: Vec<SessionCookie>) -> Result<()> {
        self.cookies
            .lock()
            .expect("cookies lock poisoned")
            .extend(cookies);
        Ok(())
    }

    async fn set_default_headers(&self, headers: Vec<(String, String)>) -> Result<()> {
        self.headers
            .lock()
            .expect("headers lock poisoned")
            .extend(headers);
        Ok(())
    }
}

fn cookie_param(c: &SessionCookie) -> CookieParam {
    CookieParam {
        name: c.name.clone(),
        value: c.value.clone(),
        url: None,
        domain: Some(c.domain.clone()),
        path: c.path.clone(),
        secure: None,
        http_only: None,
        same_site: None,
        expires: None,
        priority: None,
        same_party: None,
        source_scheme: None,
        source_port: None,
        partition_key: None,
    }
}

struct ChromeTab {
    tab: Arc<Tab>,
}

#[async_trait]
impl Page for ChromeTab {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        let tab = self.tab.clone();
        let url = url.to_string();
        task::spawn_blocking(move || -> Result<()> {
            tab.set_default_timeout(timeout);
            tab.navigate_to(&url)
                .with_context(|| format!("could not navigate to {}", url))?;
            tab.wait_until_navigated()
                .with_context(|| format!("navigation to {} did not settle", url))?;
            Ok(())
        })
        .await?
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        let tab = self.tab.clone();
        let selector = selector.to_string();
        task::spawn_blocking(move || -> Result<()> {
            tab.wait_for_element_with_custom_timeout(&selector, timeout)
                .with_context(|| format!("selector {} did not appear", selector))?;
            Ok(())
        })
        .await?
    }

    async fn query(&self, selector: &str) -> Result<Option<Box<dyn Element>>> {
        let tab = self.tab.clone();
        let selector = selector.to_string();
        let node_id = task::spawn_blocking(move || match tab.find_element(&selector) {
            Ok(el) => Some(el.node_id),
            Err(_) => None,
        })
        .await?;
        Ok(node_id.map(|node_id| {
            Box::new(ChromeElement {
                tab: self.tab.clone(),
                node_id,
            }) as Box<dyn Element>
        }))
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<Box<dyn Element>>> {
        let tab = self.tab.clone();
        let selector = selector.to_string();
        let node_ids = task::spawn_blocking(move || match tab.find_elements(&selector) {
            Ok(els) => els.iter().map(|el| el.node_id).collect(),
            Err(_) => vec![],
        })
        .await?;
        Ok(node_ids
            .into_iter()
            .map(|node_id| {
                Box::new(ChromeElement {
                    tab: self.tab.clone(),
                    node_id,
                }) as Box<dyn Element>
            })
            .collect())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        let tab = self.tab.clone();
        let selector = selector.to_string();
        let value = value.to_string();
        task::spawn_blocking(move || -> Result<()> {
            let el = tab
                .find_element(&selector)
                .with_context(|| format!("no element for {}", selector))?;
            el.click()?;
            el.type_into(&value)?;
            Ok(())
        })
        .await?
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let tab = self.tab.clone();
        let selector = selector.to_string();
        task::spawn_blocking(move || -> Result<()> {
            tab.find_element(&selector)
                .with_context(|| format!("no element for {}", selector))?
                .click()?;
            Ok(())
        })
        .await?
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let tab = self.tab.clone();
        task::spawn_blocking(move || {
            tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, false)
                .context("screenshot could not be captured")
        })
        .await?
    }

    async fn close(&self) {
        let tab = self.tab.clone();
        let _ = task::spawn_blocking(move || {
            if let Err(e) = tab.close(true) {
                warn!("could not close tab: {}", e);
            }
        })
        .await;
    }
}

struct ChromeElement {
    tab: Arc<Tab>,
    node_id: u32,
}

impl ChromeElement {
    fn boxed(tab: Arc<Tab>, node_id: u32) -> Box<dyn Element> {
        Box::new(ChromeElement { tab, node_id })
    }
}

#[async_trait]
impl Element for ChromeElement {
    async fn text(&self) -> Result<Option<String>> {
        let tab = self.tab.clone();
        let node_id = self.node_id;
        task::spawn_blocking(move || {
            let el = headless_chrome::Element::new(&tab, node_id)?;
            let text = el.get_inner_text()?;
            let text = text.trim().to_string();
            Ok(if text.is_empty() { None } else { Some(text) })
        })
        .await?
    }

    async fn attr(&self, name: &str) -> Result<Option<String>> {
        let tab = self.tab.clone();
        let node_id = self.node_id;
        let name = name.to_string();
        task::spawn_blocking(move || {
            let el = headless_chrome::Element::new(&tab, node_id)?;
            // attributes come back as a flat [name, value, ...] list
            let attrs = match el.get_attributes()? {
                Some(attrs) => attrs,
                None => return Ok(None),
            };
            for pair in attrs.chunks(2) {
                if pair.len() == 2 && pair[0] == name {
                    return Ok(Some(pair[1].clone()));
                }
            }
            Ok(None)
        })
        .await?
    }

    async fn query(&self, selector: &str) -> Result<Option<Box<dyn Element>>> {
        let tab = self.tab.clone();
        let node_id = self.node_id;
        let selector = selector.to_string();
        let found = task::spawn_blocking(move || -> Option<u32> {
            let el = headless_chrome::Element::new(&tab, node_id).ok()?;
            el.find_element(&selector).ok().map(|child| child.node_id)
        })
        .await?;
        Ok(found.map(|id| ChromeElement::boxed(self.tab.clone(), id)))
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<Box<dyn Element>>> {
        let tab = self.tab.clone();
        let node_id = self.node_id;
        let selector = selector.to_string();
        let found = task::spawn_blocking(move || -> Vec<u32> {
            let el = match headless_chrome::Element::new(&tab, node_id) {
                Ok(el) => el,
                Err(_) => return vec![],
            };
            match el.find_elements(&selector) {
                Ok(children) => children.iter().map(|c| c.node_id).collect(),
                Err(_) => vec![],
            }
        })
        .await?;
        Ok(found
            .into_iter()
            .map(|id| ChromeElement::boxed(self.tab.clone(), id))
            .collect())
    }
}
