//! Hybrid index builder.
//!
//! [`build_or_reuse`] resolves a collection identity against the vector
//! store. An existing collection is loaded as-is (nothing is re-embedded or
//! re-added); a missing one is created and filled. Either way the lexical
//! index is rebuilt from the supplied records, so callers must pass the
//! full, current record set for that identity.
//!
//! Filling a new collection tries three embedding tiers in order:
//! 1. bulk `embed_documents` in batches (bulk-capable embedders only),
//! 2. one `embed` call per record,
//! 3. `add` without vectors, letting the store apply its own embedding function.
//!
//! A tier failure is logged and the next tier runs. If the last tier
//! fails, the half-made collection is dropped and the build fails.

use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{KbError, KbResult};
use crate::lexical::LexicalIndex;
use crate::models::DocumentRecord;
use crate::retriever::{EnsembleRetriever, EnsembleWeights};
use crate::store::{Collection, VectorStore};

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub top_k: usize,
    pub weights: EnsembleWeights,
    /// `false` appends a millisecond timestamp to the name, so every call
    /// gets a fresh collection.
    pub local_mode: bool,
    /// Drop an existing collection under the same name before building.
    pub reindex: bool,
    pub batch_size: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            top_k: 4,
            weights: EnsembleWeights::default(),
            local_mode: true,
            reindex: false,
            batch_size: 32,
        }
    }
}

impl BuildOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            weights: EnsembleWeights::new(
                config.retrieval.lexical_weight,
                config.retrieval.semantic_weight,
            ),
            local_mode: true,
            reindex: false,
            batch_size: config.embedding.batch_size,
        }
    }

    pub fn with_reindex(mut self, reindex: bool) -> Self {
        self.reindex = reindex;
        self
    }

    pub fn with_local_mode(mut self, local_mode: bool) -> Self {
        self.local_mode = local_mode;
        self
    }

    fn validate(&self) -> KbResult<()> {
        if self.top_k == 0 {
            return Err(KbError::InvalidInput("top_k must be >= 1".into()));
        }
        let EnsembleWeights { lexical, semantic } = self.weights;
        if lexical < 0.0 || semantic < 0.0 || lexical + semantic <= 0.0 {
            return Err(KbError::InvalidInput(
                "ensemble weights must be >= 0 with a positive sum".into(),
            ));
        }
        Ok(())
    }
}

/// Collection name actually used for `collection_id` under `options`.
pub fn effective_name(collection_id: &str, options: &BuildOptions) -> String {
    if options.local_mode {
        collection_id.to_string()
    } else {
        format!(
            "{}_{}",
            collection_id,
            chrono::Utc::now().timestamp_millis()
        )
    }
}

pub async fn build_or_reuse(
    store: &dyn VectorStore,
    embedder: &Embedder,
    docs: Vec<DocumentRecord>,
    collection_id: &str,
    options: &BuildOptions,
) -> KbResult<EnsembleRetriever> {
    options.validate()?;
    let name = effective_name(collection_id, options);

    let mut existing = store.get_collection(&name).await?;
    if existing.is_some() && options.reindex {
        store.delete_collection(&name).await?;
        info!(collection = %name, "Deleted existing collection for reindex");
        existing = None;
    }

    let collection = match existing {
        Some(collection) => {
            info!(collection = %name, "Collection exists, reusing without re-embedding");
            collection
        }
        None => {
            info!(collection = %name, documents = docs.len(), "Creating collection");
            let collection = store.create_collection(&name).await?;
            if let Err(e) = fill(collection.as_ref(), embedder, &docs, options.batch_size).await {
                if let Err(cleanup) = store.delete_collection(&name).await {
                    warn!(collection = %name, error = %cleanup, "Failed to drop incomplete collection");
                }
                return Err(e);
            }
            collection
        }
    };

    let count = collection.count().await?;
    info!(collection = %name, count, "Collection ready");

    let lexical = build_lexical(docs).await?;
    Ok(EnsembleRetriever::new(
        lexical,
        collection,
        options.top_k,
        options.weights,
    ))
}

/// Load a persisted collection and rebuild its lexical side from the
/// records stored in it.
pub async fn open_retriever(
    store: &dyn VectorStore,
    name: &str,
    options: &BuildOptions,
) -> KbResult<EnsembleRetriever> {
    options.validate()?;
    let collection = store
        .get_collection(name)
        .await?
        .ok_or_else(|| KbError::CollectionNotFound(name.to_string()))?;
    let docs = collection.records().await?;
    let lexical = build_lexical(docs).await?;
    Ok(EnsembleRetriever::new(
        lexical,
        collection,
        options.top_k,
        options.weights,
    ))
}

async fn build_lexical(docs: Vec<DocumentRecord>) -> KbResult<LexicalIndex> {
    let index = tokio::task::spawn_blocking(move || LexicalIndex::from_documents(docs))
        .await
        .map_err(|e| KbError::Other(anyhow::anyhow!("lexical index task failed: {e}")))??;
    Ok(index)
}

async fn fill(
    collection: &dyn Collection,
    embedder: &Embedder,
    docs: &[DocumentRecord],
    batch_size: usize,
) -> KbResult<()> {
    if docs.is_empty() {
        return Ok(());
    }
    let name = collection.name().to_string();
    let texts: Vec<String> = docs.iter().map(|d| d.content.clone()).collect();

    if let Embedder::Bulk(_) = embedder {
        match embedder.embed_all(&texts, batch_size).await {
            Ok(vectors) => match collection.add(docs, Some(&vectors)).await {
                Ok(_) => return Ok(()),
                Err(e) => warn!(collection = %name, error = %e, "Insert with bulk embeddings failed, falling back"),
            },
            Err(e) => warn!(collection = %name, error = %e, "Bulk embedding failed, falling back to per-text embedding"),
        }
    }

    if embedder.is_enabled() {
        match embed_each(embedder, &texts).await {
            Ok(vectors) => match collection.add(docs, Some(&vectors)).await {
                Ok(_) => return Ok(()),
                Err(e) => warn!(collection = %name, error = %e, "Insert with per-text embeddings failed, falling back"),
            },
            Err(e) => warn!(collection = %name, error = %e, "Per-text embedding failed, falling back to store embedding"),
        }
    }

    collection
        .add(docs, None)
        .await
        .map(|_| ())
        .map_err(|e| KbError::IndexBuild {
            collection: name,
            reason: e.to_string(),
        })
}

async fn embed_each(embedder: &Embedder, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(texts.len());
    for text in texts {
        vectors.push(embedder.embed_one(text).await?);
    }
    Ok(vectors)
}
