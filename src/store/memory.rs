//! In-memory [`VectorStore`] for tests and ephemeral use.
//!
//! Collections live in a `BTreeMap` behind `std::sync::RwLock`, so listing
//! is naturally sorted. Vector search is brute-force cosine similarity.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::chunk::record_id;
use crate::embedding::cosine_similarity;
use crate::models::DocumentRecord;

use super::{check_embedding_count, top_k, Collection, EmbeddingFunction, ScoredRecord, VectorStore};

struct Entry {
    record: DocumentRecord,
    vector: Option<Vec<f32>>,
}

#[derive(Default)]
struct Entries {
    ids: HashSet<String>,
    rows: Vec<Entry>,
}

pub struct MemoryCollection {
    name: String,
    embedding: EmbeddingFunction,
    entries: RwLock<Entries>,
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().map_err(poisoned)?.rows.len())
    }

    async fn add(
        &self,
        records: &[DocumentRecord],
        embeddings: Option<&[Vec<f32>]>,
    ) -> Result<usize> {
        let computed;
        let vectors = match embeddings {
            Some(v) => Some(v),
            None => {
                computed = self.embedding.embed_records(records).await?;
                computed.as_deref()
            }
        };
        if let Some(v) = vectors {
            check_embedding_count(records, v)?;
        }

        let mut entries = self.entries.write().map_err(poisoned)?;
        let mut inserted = 0;
        for (i, record) in records.iter().enumerate() {
            if !entries.ids.insert(record_id(record)) {
                continue;
            }
            entries.rows.push(Entry {
                record: record.clone(),
                vector: vectors.map(|v| v[i].clone()),
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredRecord>> {
        let entries = self.entries.read().map_err(poisoned)?;
        let scored = entries
            .rows
            .iter()
            .filter_map(|e| {
                e.vector.as_ref().map(|v| ScoredRecord {
                    record: e.record.clone(),
                    score: cosine_similarity(vector, v),
                })
            })
            .collect();
        Ok(top_k(scored, k))
    }

    async fn query_text(&self, text: &str, k: usize) -> Result<Vec<ScoredRecord>> {
        match self.embedding.embed_query(text).await? {
            Some(vector) => self.query(&vector, k).await,
            None => Ok(Vec::new()),
        }
    }

    async fn records(&self) -> Result<Vec<DocumentRecord>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.rows.iter().map(|e| e.record.clone()).collect())
    }
}

pub struct InMemoryStore {
    embedding: EmbeddingFunction,
    collections: RwLock<BTreeMap<String, Arc<MemoryCollection>>>,
}

impl InMemoryStore {
    pub fn new(embedding: EmbeddingFunction) -> Self {
        Self {
            embedding,
            collections: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(EmbeddingFunction::none())
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self.collections.read().map_err(poisoned)?.keys().cloned().collect())
    }

    async fn get_collection(&self, name: &str) -> Result<Option<Arc<dyn Collection>>> {
        let collections = self.collections.read().map_err(poisoned)?;
        Ok(collections
            .get(name)
            .map(|c| c.clone() as Arc<dyn Collection>))
    }

    async fn create_collection(&self, name: &str) -> Result<Arc<dyn Collection>> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        let collection = collections
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(MemoryCollection {
                    name: name.to_string(),
                    embedding: self.embedding.clone(),
                    entries: RwLock::new(Entries::default()),
                })
            })
            .clone();
        Ok(collection as Arc<dyn Collection>)
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        if collections.remove(name).is_none() {
            bail!("collection not found: {}", name);
        }
        Ok(())
    }
}
