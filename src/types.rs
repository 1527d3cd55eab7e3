use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlerError {
    #[error("invalid_config: {0}")]
    InvalidConfig(String),
    #[error("initialization: {0}")]
    Initialization(String),
    #[error("page_load {url}: {message}")]
    PageLoad { url: String, message: String },
    #[error("extraction[{extractor}]: {message}")]
    Extraction { extractor: String, message: String },
    #[error("checkpoint: {0}")]
    Checkpoint(String),
}

/// State tag of a crawl session. `Completed` and `Error` are terminal,
/// `Paused` can be resumed from a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlState {
    Crawling,
    Paused,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlProgress {
    pub current_page: usize,
    pub total_pages: usize,
    pub components_found: usize,
    pub errors_count: usize,
    pub current_url: Option<String>,
    pub state: CrawlState,
}

impl Default for CrawlProgress {
    fn default() -> Self {
        CrawlProgress {
            current_page: 0,
            total_pages: 0,
            components_found: 0,
            errors_count: 0,
            current_url: None,
            state: CrawlState::Crawling,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeExample {
    pub language: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PropSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub prop_type: Option<String>,
    pub default: Option<String>,
    pub required: bool,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentMetadata {
    pub source_url: String,
    pub extracted_at: DateTime<Utc>,
}

/// One extracted documentation record. The id is a content hash of
/// name, category and description so re-extracting the same logical
/// component from another page collapses to a single record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Component {
    pub id: String,
    pub name: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub examples: Vec<CodeExample>,
    pub props: Vec<PropSpec>,
    pub installation: Option<String>,
    pub dependencies: Vec<String>,
    pub demo_url: Option<String>,
    pub metadata: ComponentMetadata,
}

impl Component {
    pub fn new(name: String, category: Option<String>, description: Option<String>) -> Self {
        let id = component_id(&name, category.as_deref(), description.as_deref());
        Component {
            id,
            name,
            category,
            description,
            examples: vec![],
            props: vec![],
            installation: None,
            dependencies: vec![],
            demo_url: None,
            metadata: ComponentMetadata {
                source_url: String::new(),
                extracted_at: Utc::now(),
            },
        }
    }
}

/// Stable identity for a component: sha256 over the identifying fields,
/// truncated to 16 hex chars.
pub fn component_id(name: &str, category: Option<&str>, description: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b"|");
    hasher.update(category.unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(description.unwrap_or("").as_bytes());
    let digest = hasher.finalize();
    digest
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrawlErrorEntry {
    pub url: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl CrawlErrorEntry {
    pub fn new(url: &str, message: String) -> Self {
        CrawlErrorEntry {
            url: url.into(),
            message,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlMetadata {
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_components: usize,
    pub total_pages: usize,
    pub errors: Vec<CrawlErrorEntry>,
    pub version: Option<String>,
}

/// Final output of a crawl. `success` reflects whether the engine reached
/// a terminal state normally, not whether zero errors occurred.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    pub success: bool,
    pub components: Vec<Component>,
    pub metadata: CrawlMetadata,
}

/// Serializable snapshot of everything the engine needs to resume an
/// interrupted crawl. `queued` preserves the frontier so resuming does
/// not re-fetch visited URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    pub visited: HashSet<String>,
    pub queued: Vec<String>,
    pub components: HashMap<String, Component>,
    pub errors: Vec<CrawlErrorEntry>,
    pub progress: CrawlProgress,
    pub timestamp: DateTime<Utc>,
}
