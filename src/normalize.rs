//! Document normalizer: locations in, text records out.
//!
//! Each location (URL or local file) is loaded, run through the content
//! extractor and turned into one [`DocumentRecord`], optionally split into
//! token-window chunks. A location that fails to load or yields no text maps
//! to an empty list; nothing here is fatal.

use futures::stream::{self, StreamExt};
use indexmap::{IndexMap, IndexSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::chunk;
use crate::config::ChunkingConfig;
use crate::extract::{self, Extracted};
use crate::fetch::Fetcher;
use crate::models::DocumentRecord;

pub type DocsMap = IndexMap<String, Vec<DocumentRecord>>;

pub struct Normalizer {
    fetcher: Arc<dyn Fetcher>,
    chunking: ChunkingConfig,
    concurrency: usize,
}

impl Normalizer {
    pub fn new(fetcher: Arc<dyn Fetcher>, chunking: ChunkingConfig, concurrency: usize) -> Self {
        Self {
            fetcher,
            chunking,
            concurrency: concurrency.max(1),
        }
    }

    pub fn chunking(&self) -> &ChunkingConfig {
        &self.chunking
    }

    /// Load every location, preserving input order. Duplicate locations are
    /// loaded once.
    pub async fn to_documents(&self, locations: &[String], local_mode: bool, split: bool) -> DocsMap {
        let unique: IndexSet<String> = locations.iter().cloned().collect();

        let loaded: Vec<(String, Vec<DocumentRecord>)> = stream::iter(unique)
            .map(|location: String| async move {
                let records = match self.load(&location, local_mode).await {
                    Ok(Some(record)) if split => {
                        chunk::split_documents(&[record], &self.chunking)
                    }
                    Ok(Some(record)) => vec![record],
                    Ok(None) => Vec::new(),
                    Err(e) => {
                        warn!(location = %location, error = %e, "Failed to load document");
                        Vec::new()
                    }
                };
                (location, records)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let docs: DocsMap = loaded.into_iter().collect();
        let total: usize = docs.values().map(Vec::len).sum();
        info!(
            locations = docs.len(),
            documents = total,
            local_mode,
            split,
            "Documents normalized"
        );
        docs
    }

    async fn load(&self, location: &str, local_mode: bool) -> anyhow::Result<Option<DocumentRecord>> {
        let (bytes, content_type) = if local_mode {
            let bytes = tokio::fs::read(location).await?;
            let ct = extract::content_type_for_path(location).map(str::to_string);
            (bytes, ct)
        } else {
            let page = self.fetcher.fetch(location).await?;
            let ct = page
                .content_type
                .or_else(|| extract::content_type_for_path(&page.url).map(str::to_string));
            (page.body, ct)
        };

        let content_type = content_type.unwrap_or_else(|| sniff(&bytes).to_string());
        let extracted: Extracted = tokio::task::spawn_blocking({
            let content_type = content_type.clone();
            move || extract::extract_text(&bytes, &content_type)
        })
        .await??;

        if extracted.text.trim().is_empty() {
            return Ok(None);
        }

        let mut record = DocumentRecord::new(location, extracted.text)
            .with_metadata("content_type", extract::essence(&content_type));
        if let Some(title) = extracted.title {
            record = record.with_metadata("title", title);
        } else if local_mode {
            if let Some(name) = Path::new(location).file_name() {
                record = record.with_metadata("title", name.to_string_lossy().to_string());
            }
        }
        Ok(Some(record))
    }
}

/// Fallback when neither header nor extension names a type.
fn sniff(bytes: &[u8]) -> &'static str {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]).to_ascii_lowercase();
    if bytes.starts_with(b"%PDF") {
        extract::MIME_PDF
    } else if head.contains("<html") || head.contains("<!doctype html") {
        extract::MIME_HTML
    } else if std::str::from_utf8(bytes).is_ok() {
        extract::MIME_TEXT
    } else {
        "application/octet-stream"
    }
}

/// Keep chunks containing at least one keyword (case-insensitive) and drop
/// locations left empty. No keywords means no filtering.
pub fn filter_docs_by_keywords(docs: DocsMap, keywords: &[String]) -> DocsMap {
    if keywords.is_empty() {
        return docs;
    }
    let needles: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
    docs.into_iter()
        .filter_map(|(location, records)| {
            let kept: Vec<DocumentRecord> = records
                .into_iter()
                .filter(|r| {
                    let haystack = r.content.to_lowercase();
                    needles.iter().any(|k| haystack.contains(k.as_str()))
                })
                .collect();
            (!kept.is_empty()).then_some((location, kept))
        })
        .collect()
}
