use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use harvester::{
    browser::{Browser, Element, Page},
    config::SessionCookie,
};

/// In-memory DOM node: text, attributes and selector-keyed children.
#[derive(Clone, Debug, Default)]
pub struct FakeNode {
    text: Option<String>,
    attrs: HashMap<String, String>,
    children: HashMap<String, Vec<FakeNode>>,
}

impl FakeNode {
    pub fn new() -> Self {
        FakeNode::default()
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn with_children(mut self, selector: &str, children: Vec<FakeNode>) -> Self {
        self.children.entry(selector.into()).or_default().extend(children);
        self
    }

    pub fn anchor(href: &str) -> Self {
        FakeNode::new().with_attr("href", href)
    }
}

/// An in-memory site: url -> page root, plus per-url failure injection
/// and attempt counters so tests can assert retry and dedup behavior.
#[derive(Default)]
pub struct FakeSite {
    pages: HashMap<String, FakeNode>,
    fail: Mutex<HashMap<String, usize>>,
    attempts: Mutex<HashMap<String, usize>>,
    actions: Mutex<Vec<String>>,
}

impl FakeSite {
    pub fn new() -> Self {
        FakeSite::default()
    }

    pub fn page(mut self, url: &str, root: FakeNode) -> Self {
        self.pages.insert(url.into(), root);
        self
    }

    /// The first `times` navigations to `url` fail.
    pub fn failing(self, url: &str, times: usize) -> Self {
        self.fail.lock().unwrap().insert(url.into(), times);
        self
    }

    pub fn attempts(&self, url: &str) -> usize {
        *self.attempts.lock().unwrap().get(url).unwrap_or(&0)
    }

    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().unwrap().clone()
    }
}

pub struct FakeBrowser {
    site: Arc<FakeSite>,
}

impl FakeBrowser {
    pub fn new(site: Arc<FakeSite>) -> Self {
        FakeBrowser { site }
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn new_page(&self) -> Result<Box<dyn Page>> {
        Ok(Box::new(FakePage {
            site: self.site.clone(),
            current: Mutex::new(None),
        }))
    }

    async fn set_cookies(&self, cookies: Vec<SessionCookie>) -> Result<()> {
        self.site
            .actions
            .lock()
            .unwrap()
            .push(format!("cookies:{}", cookies.len()));
        Ok(())
    }

    async fn set_default_headers(&self, headers: Vec<(String, String)>) -> Result<()> {
        let mut actions = self.site.actions.lock().unwrap();
        for (name, value) in headers {
            actions.push(format!("header:{}={}", name, value));
        }
        Ok(())
    }
}

pub struct FakePage {
    site: Arc<FakeSite>,
    current: Mutex<Option<FakeNode>>,
}

#[async_trait]
impl Page for FakePage {
    async fn goto(&self, url: &str, _timeout: Duration) -> Result<()> {
        *self.site.attempts.lock().unwrap().entry(url.into()).or_insert(0) += 1;

        if let Some(remaining) = self.site.fail.lock().unwrap().get_mut(url) {
            if *remaining > 0 {
                *remaining -= 1;
                bail!("connection reset");
            }
        }
        match self.site.pages.get(url) {
            Some(root) => {
                *self.current.lock().unwrap() = Some(root.clone());
                Ok(())
            }
            None => bail!("404 not found"),
        }
    }

    async fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> Result<()> {
        let current = self.current.lock().unwrap();
        let found = current
            .as_ref()
            .map(|root| root.children.contains_key(selector))
            .unwrap_or(false);
        if found {
            Ok(())
        } else {
            bail!("timed out waiting for {}", selector)
        }
    }

    async fn query(&self, selector: &str) -> Result<Option<Box<dyn Element>>> {
        Ok(self.query_all(selector).await?.into_iter().next())
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<Box<dyn Element>>> {
        let current = self.current.lock().unwrap();
        Ok(match current.as_ref() {
            Some(root) => boxed_children(root, selector),
            None => vec![],
        })
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.site
            .actions
            .lock()
            .unwrap()
            .push(format!("fill:{}={}", selector, value));
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.site
            .actions
            .lock()
            .unwrap()
            .push(format!("click:{}", selector));
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Ok(b"png".to_vec())
    }

    async fn close(&self) {}
}

#[async_trait]
impl Element for FakeNode {
    async fn text(&self) -> Result<Option<String>> {
        Ok(self.text.clone())
    }

    async fn attr(&self, name: &str) -> Result<Option<String>> {
        Ok(self.attrs.get(name).cloned())
    }

    async fn query(&self, selector: &str) -> Result<Option<Box<dyn Element>>> {
        Ok(boxed_children(self, selector).into_iter().next())
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<Box<dyn Element>>> {
        Ok(boxed_children(self, selector))
    }
}

fn boxed_children(node: &FakeNode, selector: &str) -> Vec<Box<dyn Element>> {
    node.children
        .get(selector)
        .map(|nodes| {
            nodes
                .iter()
                .map(|n| Box::new(n.clone()) as Box<dyn Element>)
                .collect()
        })
        .unwrap_or_default()
}
