use std::path::{Path, PathBuf};

use chrono::Utc;
use url::Url;

pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Resolve an href against the page it was found on and strip the
/// fragment, so equivalent URLs dedupe to one frontier entry. Returns
/// None for hrefs that cannot become absolute URLs (mailto:, javascript:,
/// garbage) rather than erroring out.
pub fn normalize_url(page_url: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("mailto:") || href.starts_with("javascript:") {
        return None;
    }
    let resolved = match Url::parse(href) {
        Ok(u) => u,
        Err(_) => {
            let base = Url::parse(page_url).ok()?;
            base.join(href).ok()?
        }
    };
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }
    let mut resolved = resolved;
    resolved.set_fragment(None);
    Some(resolved.to_string())
}

/// Screenshot file for a failed navigation:
/// `<output_dir>/screenshots/error-<ts>-<sanitized-url>.png`
pub fn screenshot_path(output_dir: &Path, url: &str) -> PathBuf {
    let ts = Utc::now().format(TIMESTAMP_FORMAT);
    let sanitized: String = url
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .take(80)
        .collect();
    output_dir
        .join("screenshots")
        .join(format!("error-{}-{}.png", ts, sanitized))
}
