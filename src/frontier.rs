use std::collections::{HashSet, VecDeque};

use regex::Regex;
use url::Url;

use crate::{config::UrlPatterns, types::CrawlerError};

/// Deduplicated set of discovered-but-not-yet-fetched URLs, filtered by
/// same-origin policy and include/exclude patterns. Single-writer: only
/// the engine's coordinator loop mutates it.
pub struct UrlFrontier {
    origin: url::Origin,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    queue: VecDeque<String>,
    queued: HashSet<String>,
    visited: HashSet<String>,
}

impl UrlFrontier {
    pub fn new(base_url: &str, patterns: &UrlPatterns) -> Result<Self, CrawlerError> {
        let base = Url::parse(base_url)
            .map_err(|e| CrawlerError::InvalidConfig(format!("invalid base_url {}: {}", base_url, e)))?;
        let compile = |raw: &[String]| -> Result<Vec<Regex>, CrawlerError> {
            raw.iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| {
                        CrawlerError::InvalidConfig(format!("invalid url pattern {}: {}", p, e))
                    })
                })
                .collect()
        };
        Ok(UrlFrontier {
            origin: base.origin(),
            include: compile(&patterns.include)?,
            exclude: compile(&patterns.exclude)?,
            queue: VecDeque::new(),
            queued: HashSet::new(),
            visited: HashSet::new(),
        })
    }

    /// Policy gate: same origin as the base URL, at least one include
    /// pattern when any are configured, and no exclude pattern. Exclude
    /// wins over include. Malformed URLs are simply not crawlable.
    pub fn should_crawl(&self, url: &str) -> bool {
        let parsed = match Url::parse(url) {
            Ok(u) => u,
            Err(_) => return false,
        };
        if parsed.origin() != self.origin {
            return false;
        }
        if self.exclude.iter().any(|re| re.is_match(url)) {
            return false;
        }
        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(url)) {
            return false;
        }
        true
    }

    /// Idempotent: re-enqueuing a queued or visited URL is a no-op.
    /// Returns whether the URL was actually added.
    pub fn enqueue(&mut self, url: &str) -> bool {
        if !self.should_crawl(url) {
            return false;
        }
        if self.visited.contains(url) || !self.queued.insert(url.to_string()) {
            return false;
        }
        self.queue.push_back(url.to_string());
        true
    }

    /// Pops the next URL and moves it to the visited set, guaranteeing at
    /// most one fetch per URL even if it gets re-discovered mid-flight.
    pub fn next(&mut self) -> Option<String> {
        let url = self.queue.pop_front()?;
        self.queued.remove(&url);
        self.visited.insert(url.clone());
        Some(url)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    pub fn snapshot(&self) -> (HashSet<String>, Vec<String>) {
        (self.visited.clone(), self.queue.iter().cloned().collect())
    }

    /// Restores frontier state from a checkpoint; queued URLs keep their
    /// original discovery order.
    pub fn restore(&mut self, visited: HashSet<String>, queued: Vec<String>) {
        self.visited = visited;
        self.queue.clear();
        self.queued.clear();
        for url in queued {
            if !self.visited.contains(&url) && self.queued.insert(url.clone()) {
                self.queue.push_back(url);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn frontier(include: &[&str], exclude: &[&str]) -> UrlFrontier {
        let patterns = UrlPatterns {
            include: include.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
        };
        UrlFrontier::new("https://x.test/docs", &patterns).unwrap()
    }

    #[test]
    fn foreign_origins_are_rejected_regardless_of_patterns() {
        let f = frontier(&["docs"], &[]);
        assert!(!f.should_crawl("https://other.test/docs/button"));
        assert!(!f.should_crawl("http://x.test/docs/button")); // scheme differs
        assert!(f.should_crawl("https://x.test/docs/button"));
    }

    #[test]
    fn exclude_wins_over_include() {
        let f = frontier(&["/docs/"], &["/docs/changelog"]);
        assert!(f.should_crawl("https://x.test/docs/button"));
        assert!(!f.should_crawl("https://x.test/docs/changelog"));
    }

    #[test]
    fn no_include_patterns_means_everything_on_origin() {
        let f = frontier(&[], &[]);
        assert!(f.should_crawl("https://x.test/anything"));
    }

    #[test]
    fn malformed_urls_are_not_crawlable() {
        let f = frontier(&[], &[]);
        assert!(!f.should_crawl("not a url"));
        assert!(!f.should_crawl(""));
        assert!(!f.should_crawl("/relative/only"));
    }

    #[test]
    fn enqueue_is_idempotent() {
        let mut f = frontier(&[], &[]);
        assert!(f.enqueue("https://x.test/docs/a"));
        assert!(!f.enqueue("https://x.test/docs/a"));
        assert_eq!(f.pending(), 1);

        let url = f.next().unwrap();
        assert_eq!(url, "https://x.test/docs/a");
        // visited URLs never re-enter the queue
        assert!(!f.enqueue("https://x.test/docs/a"));
        assert_eq!(f.pending(), 0);
    }

    #[test]
    fn restore_skips_already_visited_urls() {
        let mut f = frontier(&[], &[]);
        let visited: HashSet<String> = ["https://x.test/docs/a".to_string()].into();
        f.restore(
            visited,
            vec![
                "https://x.test/docs/a".into(),
                "https://x.test/docs/b".into(),
            ],
        );
        assert_eq!(f.pending(), 1);
        assert_eq!(f.next().unwrap(), "https://x.test/docs/b");
    }
}
