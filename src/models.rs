//! Core data models that flow through the crawl → normalize → index pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A unit of indexed text: one whole document or one chunk of it.
///
/// Produced by the normalizer, consumed read-only by the index builder.
/// `metadata` always carries `source`; chunked records also carry
/// `chunk_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub source_location: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl DocumentRecord {
    pub fn new(source_location: impl Into<String>, content: impl Into<String>) -> Self {
        let source_location = source_location.into();
        let mut metadata = Map::new();
        metadata.insert("source".to_string(), Value::String(source_location.clone()));
        Self {
            source_location,
            content: content.into(),
            metadata,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").and_then(|v| v.as_str())
    }
}

/// Raw bytes returned by a [`Fetcher`](crate::fetch::Fetcher).
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL the content was served from, after redirects.
    pub url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// A ranked retrieval result from the ensemble retriever.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub source_location: String,
    pub content: String,
    pub metadata: Map<String, Value>,
    pub score: f64,
}

/// Which resolution mode produced a collection, used as the identity prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionMode {
    Crawl,
    Direct,
    Kb,
}

impl CollectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionMode::Crawl => "crawl",
            CollectionMode::Direct => "direct",
            CollectionMode::Kb => "kb",
        }
    }
}
