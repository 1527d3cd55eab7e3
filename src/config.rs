use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::types::CrawlerError;

/// CSS selectors driving the generic list extraction. Every selector is
/// optional: a missing selector simply leaves the matching field empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub component_list: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub code_example: Option<String>,
    pub installation: Option<String>,
    pub dependencies: Option<String>,
    pub demo_link: Option<String>,
    pub prop_row: Option<String>,
    pub prop_name: Option<String>,
    pub prop_type: Option<String>,
    pub prop_default: Option<String>,
    pub prop_required: Option<String>,
    pub prop_description: Option<String>,
    // outbound link discovery, defaults to plain anchors
    pub link: Option<String>,
    pub next_page: Option<String>,
    pub version: Option<String>,
}

impl SelectorConfig {
    pub fn link_selector(&self) -> &str {
        self.link.as_deref().unwrap_or("a")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default)]
    pub path: Option<String>,
}

/// How the browsing session authenticates before the first navigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    Cookies {
        cookies: Vec<SessionCookie>,
    },
    Basic {
        username: String,
        password: String,
    },
    Bearer {
        token: String,
    },
    Form {
        login_url: String,
        username_selector: String,
        password_selector: String,
        submit_selector: String,
        username: String,
        password: String,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UrlPatterns {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

/// Immutable configuration for one crawl. `name` and `base_url` are
/// mandatory; everything else has a default.
#[derive(Builder, Debug, Clone, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate", error = "CrawlerError"))]
#[serde(default)]
pub struct CrawlerConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub base_url: String,
    #[builder(default)]
    pub selectors: SelectorConfig,
    #[builder(default)]
    pub authentication: Option<AuthConfig>,
    #[builder(default = "2.0")]
    pub requests_per_second: f64,
    #[builder(default = "2")]
    pub max_concurrent: usize,
    // per-navigation timeout in milliseconds
    #[builder(default = "30_000")]
    pub timeout_ms: u64,
    #[builder(default = "3")]
    pub retry_attempts: usize,
    #[builder(default = "1_000")]
    pub retry_delay_ms: u64,
    #[builder(default)]
    pub wait_for_selector: Option<String>,
    #[builder(default)]
    pub settle_delay_ms: Option<u64>,
    #[builder(default = "true")]
    pub headless: bool,
    #[builder(default = "true")]
    pub screenshot_on_error: bool,
    #[builder(default = "PathBuf::from(\"./output\")")]
    pub output_dir: PathBuf,
    #[builder(default = "false")]
    pub resume_from_checkpoint: bool,
    #[builder(default)]
    pub max_pages: Option<usize>,
    #[builder(default)]
    pub url_patterns: UrlPatterns,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        CrawlerConfig {
            name: String::new(),
            base_url: String::new(),
            selectors: SelectorConfig::default(),
            authentication: None,
            requests_per_second: 2.0,
            max_concurrent: 2,
            timeout_ms: 30_000,
            retry_attempts: 3,
            retry_delay_ms: 1_000,
            wait_for_selector: None,
            settle_delay_ms: None,
            headless: true,
            screenshot_on_error: true,
            output_dir: PathBuf::from("./output"),
            resume_from_checkpoint: false,
            max_pages: None,
            url_patterns: UrlPatterns::default(),
        }
    }
}

impl From<derive_builder::UninitializedFieldError> for CrawlerError {
    fn from(e: derive_builder::UninitializedFieldError) -> Self {
        CrawlerError::InvalidConfig(format!("missing mandatory field `{}`", e.field_name()))
    }
}

impl CrawlerConfigBuilder {
    fn validate(&self) -> Result<(), CrawlerError> {
        if let Some(name) = &self.name {
            if name.is_empty() {
                return Err(CrawlerError::InvalidConfig("`name` must not be empty".into()));
            }
        }
        if let Some(base_url) = &self.base_url {
            if base_url.is_empty() {
                return Err(CrawlerError::InvalidConfig(
                    "`base_url` must not be empty".into(),
                ));
            }
        }
        Ok(())
    }
}

impl CrawlerConfig {
    pub fn default_builder() -> CrawlerConfigBuilder {
        CrawlerConfigBuilder::default()
    }

    /// Deserialized configs bypass the builder, so file-loaded configs are
    /// checked here before a crawl starts.
    pub fn validate(&self) -> Result<(), CrawlerError> {
        if self.name.is_empty() {
            return Err(CrawlerError::InvalidConfig("`name` must not be empty".into()));
        }
        if self.base_url.is_empty() {
            return Err(CrawlerError::InvalidConfig(
                "`base_url` must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn settle_delay(&self) -> Option<Duration> {
        self.settle_delay_ms.map(Duration::from_millis)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}-checkpoint.json", self.name))
    }
}
