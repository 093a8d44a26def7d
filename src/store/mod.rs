//! Persistent vector store abstraction.
//!
//! A [`VectorStore`] holds named [`Collection`]s. Each collection keeps
//! document records, optionally with an embedding per record, and answers
//! nearest-neighbour queries by cosine similarity.
//!
//! Insertion is idempotent by record id ([`chunk::record_id`](crate::chunk::record_id)):
//! adding a record that is already present leaves the stored copy alone.
//!
//! Two backends exist: [`sqlite::SqliteStore`] (on disk, the default) and
//! [`memory::InMemoryStore`] (tests, ephemeral use).

pub mod memory;
pub mod sqlite;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::embedding::Embedder;
use crate::models::DocumentRecord;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// A record with its similarity to a query vector.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: DocumentRecord,
    pub score: f32,
}

/// The embedding function a store falls back to when records arrive
/// without precomputed vectors, and which it uses to embed text queries.
#[derive(Debug, Clone)]
pub struct EmbeddingFunction {
    pub embedder: Embedder,
    pub batch_size: usize,
}

impl EmbeddingFunction {
    pub fn new(embedder: Embedder, batch_size: usize) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    pub fn none() -> Self {
        Self::new(Embedder::Disabled, 1)
    }

    /// Vectors for `records`, or `None` when no embedder is configured.
    pub async fn embed_records(&self, records: &[DocumentRecord]) -> Result<Option<Vec<Vec<f32>>>> {
        if !self.embedder.is_enabled() {
            return Ok(None);
        }
        let texts: Vec<String> = records.iter().map(|r| r.content.clone()).collect();
        Ok(Some(self.embedder.embed_all(&texts, self.batch_size).await?))
    }

    pub async fn embed_query(&self, text: &str) -> Result<Option<Vec<f32>>> {
        if !self.embedder.is_enabled() {
            return Ok(None);
        }
        Ok(Some(self.embedder.embed_one(text).await?))
    }
}

#[async_trait]
pub trait Collection: Send + Sync {
    fn name(&self) -> &str;

    async fn count(&self) -> Result<usize>;

    /// Insert `records`. With `embeddings == None` the store computes them
    /// with its own embedding function, or stores text only when it has
    /// none. Returns the number of newly inserted records.
    async fn add(
        &self,
        records: &[DocumentRecord],
        embeddings: Option<&[Vec<f32>]>,
    ) -> Result<usize>;

    /// Top `k` records by cosine similarity to `vector`, best first.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredRecord>>;

    /// Embed `text` with the store's embedding function and query. Empty
    /// when the store has no embedding function.
    async fn query_text(&self, text: &str, k: usize) -> Result<Vec<ScoredRecord>>;

    /// Every stored record in insertion order.
    async fn records(&self) -> Result<Vec<DocumentRecord>>;
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Collection names in ascending order.
    async fn list_collections(&self) -> Result<Vec<String>>;

    async fn get_collection(&self, name: &str) -> Result<Option<Arc<dyn Collection>>>;

    /// Create `name`, or return the existing collection if a concurrent
    /// caller created it first.
    async fn create_collection(&self, name: &str) -> Result<Arc<dyn Collection>>;

    /// Fails when `name` does not exist.
    async fn delete_collection(&self, name: &str) -> Result<()>;
}

pub(crate) fn check_embedding_count(records: &[DocumentRecord], embeddings: &[Vec<f32>]) -> Result<()> {
    if records.len() != embeddings.len() {
        bail!(
            "embedding count mismatch: {} records, {} embeddings",
            records.len(),
            embeddings.len()
        );
    }
    Ok(())
}

/// Sort by score descending and keep `k`.
pub(crate) fn top_k(mut scored: Vec<ScoredRecord>, k: usize) -> Vec<ScoredRecord> {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(k);
    scored
}
