use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;

use crate::{
    browser::{Element, Page},
    config::SelectorConfig,
    types::{CodeExample, Component, CrawlErrorEntry, CrawlerError, PropSpec},
};

/// A pluggable extraction capability: maps a loaded page to zero or more
/// component records. The engine is agnostic to what an extractor does
/// internally; it only cares about the name (for error attribution) and
/// the records.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(&self, page: &dyn Page) -> Result<Vec<Component>>;
}

/// Ordered collection of extractors run against every loaded page: the
/// generic selector-driven list extraction first, then any custom
/// extractors in registration order.
#[derive(Clone)]
pub struct ExtractorPipeline {
    extractors: Vec<Arc<dyn Extractor>>,
}

pub struct PipelineOutput {
    pub components: Vec<Component>,
    pub errors: Vec<CrawlErrorEntry>,
}

impl ExtractorPipeline {
    pub fn new(selectors: SelectorConfig) -> Self {
        ExtractorPipeline {
            extractors: vec![Arc::new(SelectorExtractor { selectors })],
        }
    }

    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        self.extractors.push(extractor);
    }

    /// Runs every extractor against the page. A failing extractor is
    /// logged by name and skipped; it never aborts the pipeline or the
    /// page, its contribution is simply absent.
    pub async fn run(&self, page: &dyn Page, page_url: &str) -> PipelineOutput {
        let mut components = vec![];
        let mut errors = vec![];
        for extractor in &self.extractors {
            match extractor.extract(page).await {
                Ok(mut extracted) => {
                    for c in extracted.iter_mut() {
                        c.metadata.source_url = page_url.into();
                    }
                    components.append(&mut extracted);
                }
                Err(e) => {
                    let err = CrawlerError::Extraction {
                        extractor: extractor.name().into(),
                        message: format!("{:#}", e),
                    };
                    warn!("{} on {}", err, page_url);
                    errors.push(CrawlErrorEntry::new(page_url, err.to_string()));
                }
            }
        }
        PipelineOutput { components, errors }
    }
}

/// Generic list extraction: walks every node matching the configured
/// component list selector and pulls the per-field sub-selectors from
/// each. Every sub-extraction is independently fault-tolerant: a missing
/// selector or absent sub-element yields an empty field, a partially
/// populated record beats a dropped one.
struct SelectorExtractor {
    selectors: SelectorConfig,
}

#[async_trait]
impl Extractor for SelectorExtractor {
    fn name(&self) -> &str {
        "selector-list"
    }

    async fn extract(&self, page: &dyn Page) -> Result<Vec<Component>> {
        let list = match &self.selectors.component_list {
            Some(sel) => sel,
            None => return Ok(vec![]),
        };
        let mut components = vec![];
        for node in page.query_all(list).await? {
            let name = match sub_text(node.as_ref(), self.selectors.name.as_deref()).await {
                Some(name) => name,
                // a record without a name has no identity, skip the node
                None => continue,
            };
            let category = sub_text(node.as_ref(), self.selectors.category.as_deref()).await;
            let description = sub_text(node.as_ref(), self.selectors.description.as_deref()).await;

            let mut component = Component::new(name, category, description);
            component.examples = self.code_examples(node.as_ref()).await;
            component.props = self.props(node.as_ref()).await;
            component.installation =
                sub_text(node.as_ref(), self.selectors.installation.as_deref()).await;
            component.dependencies =
                sub_text(node.as_ref(), self.selectors.dependencies.as_deref())
                    .await
                    .map(|raw| {
                        raw.split([',', '\n'])
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default();
            component.demo_url = sub_attr(
                node.as_ref(),
                self.selectors.demo_link.as_deref(),
                "href",
            )
            .await;

            components.push(component);
        }
        Ok(components)
    }
}

impl SelectorExtractor {
    async fn code_examples(&self, node: &dyn Element) -> Vec<CodeExample> {
        let sel = match &self.selectors.code_example {
            Some(sel) => sel,
            None => return vec![],
        };
        let blocks = match node.query_all(sel).await {
            Ok(blocks) => blocks,
            Err(_) => return vec![],
        };
        let mut examples = vec![];
        for block in blocks {
            let code = match block.text().await {
                Ok(Some(code)) => code,
                _ => continue,
            };
            let class_attr = block.attr("class").await.ok().flatten();
            let data_attr = match block.attr("data-language").await.ok().flatten() {
                Some(v) => Some(v),
                None => block.attr("data-lang").await.ok().flatten(),
            };
            let language = detect_language(class_attr.as_deref(), data_attr.as_deref(), &code);
            examples.push(CodeExample { language, code });
        }
        examples
    }

    async fn props(&self, node: &dyn Element) -> Vec<PropSpec> {
        let sel = match &self.selectors.prop_row {
            Some(sel) => sel,
            None => return vec![],
        };
        let rows = match node.query_all(sel).await {
            Ok(rows) => rows,
            Err(_) => return vec![],
        };
        let mut props = vec![];
        for row in rows {
            let name = match sub_text(row.as_ref(), self.selectors.prop_name.as_deref()).await {
                Some(name) => name,
                None => continue,
            };
            let required = sub_text(row.as_ref(), self.selectors.prop_required.as_deref())
                .await
                .map(|raw| {
                    let raw = raw.to_lowercase();
                    raw == "true" || raw == "yes" || raw == "required" || raw == "✓"
                })
                .unwrap_or(false);
            props.push(PropSpec {
                name,
                prop_type: sub_text(row.as_ref(), self.selectors.prop_type.as_deref()).await,
                default: sub_text(row.as_ref(), self.selectors.prop_default.as_deref()).await,
                required,
                description: sub_text(row.as_ref(), self.selectors.prop_description.as_deref())
                    .await,
            });
        }
        props
    }
}

async fn sub_text(node: &dyn Element, selector: Option<&str>) -> Option<String> {
    let selector = selector?;
    match node.query(selector).await {
        Ok(Some(el)) => el.text().await.ok().flatten(),
        _ => None,
    }
}

async fn sub_attr(node: &dyn Element, selector: Option<&str>, name: &str) -> Option<String> {
    let selector = selector?;
    match node.query(selector).await {
        Ok(Some(el)) => el.attr(name).await.ok().flatten(),
        _ => None,
    }
}

lazy_static! {
    static ref IMPORT_RE: Regex = Regex::new(r"(?m)^\s*(import\s.+from|export\s+(default|const|function))").unwrap();
    static ref JSX_RE: Regex = Regex::new(r"<[A-Z][A-Za-z0-9]*[\s/>]").unwrap();
    static ref SHELL_RE: Regex =
        Regex::new(r"(?m)^\s*(\$\s+)?(npm\s+(install|i|run)|yarn\s+(add|dlx)|pnpm\s+(add|dlx|install)|npx\s+|brew\s+install|cargo\s+add)").unwrap();
}

/// Language for a code block, falling back through: explicit
/// `language-*`/`lang-*` class, explicit data attribute, content
/// heuristics, `plaintext`.
pub fn detect_language(class_attr: Option<&str>, data_attr: Option<&str>, code: &str) -> String {
    if let Some(classes) = class_attr {
        for token in classes.split_whitespace() {
            if let Some(lang) = token.strip_prefix("language-") {
                return lang.into();
            }
            if let Some(lang) = token.strip_prefix("lang-") {
                return lang.into();
            }
        }
    }
    if let Some(lang) = data_attr {
        if !lang.is_empty() {
            return lang.into();
        }
    }
    if SHELL_RE.is_match(code) {
        return "bash".into();
    }
    let trimmed = code.trim_start();
    if trimmed.to_lowercase().starts_with("<!doctype") || trimmed.starts_with("<html") {
        return "html".into();
    }
    if IMPORT_RE.is_match(code) || JSX_RE.is_match(code) {
        return "tsx".into();
    }
    "plaintext".into()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn class_attribute_wins() {
        let lang = detect_language(Some("prism language-rust line-numbers"), Some("js"), "npm i x");
        assert_eq!(lang, "rust");
    }

    #[test]
    fn data_attribute_is_second() {
        assert_eq!(detect_language(Some("hljs"), Some("jsx"), ""), "jsx");
    }

    #[test]
    fn content_heuristics() {
        assert_eq!(detect_language(None, None, "npm install @radix-ui/react"), "bash");
        assert_eq!(detect_language(None, None, "$ pnpm add lucide"), "bash");
        assert_eq!(
            detect_language(None, None, "<!DOCTYPE html>\n<html></html>"),
            "html"
        );
        assert_eq!(
            detect_language(None, None, "import { Button } from \"./button\"\n<Button />"),
            "tsx"
        );
        assert_eq!(detect_language(None, None, "return <Card title=\"x\" />"), "tsx");
    }

    #[test]
    fn defaults_to_plaintext() {
        assert_eq!(detect_language(None, None, "just some words"), "plaintext");
        assert_eq!(detect_language(Some("hljs"), None, ""), "plaintext");
    }
}
