use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::SessionCookie;

/// Capability surface the crawler needs from a browser automation
/// backend. Anything that can open pages, navigate, query the DOM and
/// take screenshots is substitutable here; `chrome.rs` provides the
/// production implementation, tests run against an in-memory fake.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn Page>>;

    /// Attach pre-obtained cookies to the browsing context.
    async fn set_cookies(&self, cookies: Vec<SessionCookie>) -> Result<()>;

    /// Headers injected into every subsequent page (bearer/basic auth).
    async fn set_default_headers(&self, headers: Vec<(String, String)>) -> Result<()>;
}

/// One exclusively-owned page-level resource. Scoped-acquired by a single
/// in-flight fetch and always closed before its rate-limiter slot frees.
#[async_trait]
pub trait Page: Send + Sync {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()>;

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()>;

    async fn query(&self, selector: &str) -> Result<Option<Box<dyn Element>>>;

    async fn query_all(&self, selector: &str) -> Result<Vec<Box<dyn Element>>>;

    async fn fill(&self, selector: &str, value: &str) -> Result<()>;

    async fn click(&self, selector: &str) -> Result<()>;

    /// Full-page PNG capture for failure diagnostics.
    async fn screenshot(&self) -> Result<Vec<u8>>;

    /// Best-effort; a page that fails to close is logged and leaked to
    /// the browser's own teardown.
    async fn close(&self);
}

/// A DOM node handle supporting scoped sub-queries.
#[async_trait]
pub trait Element: Send + Sync {
    async fn text(&self) -> Result<Option<String>>;

    async fn attr(&self, name: &str) -> Result<Option<String>>;

    async fn query(&self, selector: &str) -> Result<Option<Box<dyn Element>>>;

    async fn query_all(&self, selector: &str) -> Result<Vec<Box<dyn Element>>>;
}
