//! Knowledge-base orchestration and the composition root.
//!
//! [`KnowledgeBase`] owns the fetcher, the vector store and the embedder,
//! constructed once at startup and shared by the CLI and the HTTP server.
//! Its two entry points run the whole pipeline:
//!
//! - [`crawl_and_create_kb`](KnowledgeBase::crawl_and_create_kb): seed URLs →
//!   crawl (or take URLs as given) → fetch and extract → keyword filter →
//!   split → collection identity → build or reuse.
//! - [`create_knowledge_base`](KnowledgeBase::create_knowledge_base): local
//!   paths → file expansion → read and extract → split → build or reuse.

use futures::future::join_all;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::chunk;
use crate::config::Config;
use crate::crawl::{self, CrawlDepth, CrawlOptions};
use crate::embedding::Embedder;
use crate::error::{KbError, KbResult};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::index::{self, BuildOptions};
use crate::lifecycle::{self, EvictionReport};
use crate::models::{CollectionMode, DocumentRecord, RetrievedChunk};
use crate::naming::{collection_name, NameParts};
use crate::normalize::{filter_docs_by_keywords, DocsMap, Normalizer};
use crate::paths;
use crate::retriever::EnsembleRetriever;
use crate::store::{EmbeddingFunction, SqliteStore, VectorStore};

fn default_true() -> bool {
    true
}

/// Parameters for [`KnowledgeBase::crawl_and_create_kb`].
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlKbRequest {
    pub urls: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// `false` indexes the given URLs as-is.
    #[serde(default = "default_true")]
    pub crawl: bool,
    /// `None` crawls until the page budget is spent.
    #[serde(default)]
    pub depth: Option<usize>,
    #[serde(default)]
    pub max_pages: Option<usize>,
    #[serde(default)]
    pub min_delay: Option<f64>,
    #[serde(default)]
    pub max_delay: Option<f64>,
    #[serde(default)]
    pub url_keyword: Option<String>,
    #[serde(default)]
    pub reindex: bool,
}

impl CrawlKbRequest {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            keywords: Vec::new(),
            crawl: true,
            depth: None,
            max_pages: None,
            min_delay: None,
            max_delay: None,
            url_keyword: None,
            reindex: false,
        }
    }
}

/// Parameters for [`KnowledgeBase::create_knowledge_base`].
#[derive(Debug, Clone, Deserialize)]
pub struct LocalKbRequest {
    pub paths: Vec<PathBuf>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub reindex: bool,
}

/// Result of a build: the collection identity, what went into it, and a
/// retriever ready for queries.
pub struct KbBuild {
    pub collection: String,
    pub locations: Vec<String>,
    pub chunks: usize,
    pub retriever: EnsembleRetriever,
}

#[derive(Debug, Clone, Serialize)]
pub struct KbSummary {
    pub collection: String,
    pub locations: Vec<String>,
    pub chunks: usize,
}

impl KbBuild {
    pub fn summary(&self) -> KbSummary {
        KbSummary {
            collection: self.collection.clone(),
            locations: self.locations.clone(),
            chunks: self.chunks,
        }
    }
}

pub struct KnowledgeBase {
    config: Config,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn VectorStore>,
    embedder: Embedder,
    normalizer: Normalizer,
}

impl KnowledgeBase {
    /// Production wiring: HTTP fetcher, SQLite store under `store.path`,
    /// embedder from `[embedding]`.
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let embedder = Embedder::from_config(&config.embedding)?;
        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&config.crawl)?);
        let store = SqliteStore::open(
            &config.store.db_file(),
            EmbeddingFunction::new(embedder.clone(), config.embedding.batch_size),
        )
        .await?;
        info!(
            store = %config.store.db_file().display(),
            embedder = embedder.model_name(),
            "Knowledge base opened"
        );
        Ok(Self::new(config, fetcher, Arc::new(store), embedder))
    }

    pub fn new(
        config: Config,
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn VectorStore>,
        embedder: Embedder,
    ) -> Self {
        let normalizer = Normalizer::new(
            fetcher.clone(),
            config.chunking.clone(),
            config.crawl.fetch_concurrency,
        );
        Self {
            config,
            fetcher,
            store,
            embedder,
            normalizer,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &dyn VectorStore {
        self.store.as_ref()
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    fn crawl_options(&self, req: &CrawlKbRequest) -> CrawlOptions {
        let defaults = &self.config.crawl;
        CrawlOptions::from_config(defaults)
            .with_depth(CrawlDepth::from(req.depth))
            .with_max_pages(req.max_pages.unwrap_or(defaults.max_pages))
            .with_delays(
                req.min_delay.unwrap_or(defaults.min_delay),
                req.max_delay.unwrap_or(defaults.max_delay),
            )
            .with_url_keyword(req.url_keyword.clone())
    }

    pub async fn crawl_and_create_kb(&self, req: CrawlKbRequest) -> KbResult<KbBuild> {
        let seeds: Vec<String> = req
            .urls
            .iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if seeds.is_empty() {
            return Err(KbError::NoLocations("No URLs to process".into()));
        }
        let options = self.crawl_options(&req);
        options.validate()?;

        let resolved: IndexSet<String> = if req.crawl {
            info!(seeds = seeds.len(), depth = ?options.depth, "Crawling seeds");
            let crawls = seeds
                .iter()
                .map(|seed| crawl::crawl(self.fetcher.clone(), seed, options.clone()));
            let mut union = IndexSet::new();
            for result in join_all(crawls).await {
                union.extend(result?);
            }
            union
        } else {
            seeds.iter().cloned().collect()
        };
        if resolved.is_empty() {
            return Err(KbError::NoLocations("No URLs to process".into()));
        }

        let locations: Vec<String> = match &options.url_keyword {
            Some(k) => {
                let k = k.to_lowercase();
                resolved
                    .into_iter()
                    .filter(|u| u.to_lowercase().contains(&k))
                    .collect()
            }
            None => resolved.into_iter().collect(),
        };
        if locations.is_empty() {
            return Err(KbError::NoLocations(
                "No URLs to process after filtering".into(),
            ));
        }
        info!(locations = locations.len(), "URLs resolved");

        let docs = self.normalizer.to_documents(&locations, false, false).await;
        let chunks = self
            .filter_and_split(docs, &req.keywords)
            .ok_or_else(|| {
                KbError::NoDocuments("No documents found after processing and filtering".into())
            })?;

        let mode = if req.crawl {
            CollectionMode::Crawl
        } else {
            CollectionMode::Direct
        };
        let name = collection_name(&NameParts {
            mode,
            seeds: &seeds,
            locations: &locations,
            keywords: &req.keywords,
            url_keyword: options.url_keyword.as_deref(),
        });

        self.build(name, locations, chunks, req.reindex).await
    }

    pub async fn create_knowledge_base(&self, req: LocalKbRequest) -> KbResult<KbBuild> {
        let inputs = req.paths.clone();
        let files = tokio::task::spawn_blocking(move || paths::expand_paths(&inputs))
            .await
            .map_err(|e| KbError::Other(anyhow::anyhow!("path expansion task failed: {e}")))??;
        if files.is_empty() {
            return Err(KbError::NoLocations(
                "No files found in the provided paths".into(),
            ));
        }
        let locations: Vec<String> = files
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();
        info!(files = locations.len(), "Local files resolved");

        let docs = self.normalizer.to_documents(&locations, true, false).await;
        let chunks = self
            .filter_and_split(docs, &req.keywords)
            .ok_or_else(|| KbError::NoDocuments("No documents could be processed".into()))?;

        let seeds: Vec<String> = req
            .paths
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();
        let name = collection_name(&NameParts {
            mode: CollectionMode::Kb,
            seeds: &seeds,
            locations: &locations,
            keywords: &req.keywords,
            url_keyword: None,
        });

        self.build(name, locations, chunks, req.reindex).await
    }

    /// Keyword-filter whole documents, then split. `None` when nothing survives.
    fn filter_and_split(&self, docs: DocsMap, keywords: &[String]) -> Option<Vec<DocumentRecord>> {
        let filtered = filter_docs_by_keywords(docs, keywords);
        let documents: Vec<DocumentRecord> = filtered.into_values().flatten().collect();
        if documents.is_empty() {
            return None;
        }
        let chunks = chunk::split_documents(&documents, self.normalizer.chunking());
        info!(
            documents = documents.len(),
            chunks = chunks.len(),
            "Documents split"
        );
        (!chunks.is_empty()).then_some(chunks)
    }

    async fn build(
        &self,
        name: String,
        locations: Vec<String>,
        chunks: Vec<DocumentRecord>,
        reindex: bool,
    ) -> KbResult<KbBuild> {
        let options = BuildOptions::from_config(&self.config).with_reindex(reindex);
        let chunk_count = chunks.len();
        let retriever =
            index::build_or_reuse(self.store.as_ref(), &self.embedder, chunks, &name, &options)
                .await?;
        info!(collection = %name, chunks = chunk_count, "Knowledge base ready");
        Ok(KbBuild {
            collection: name,
            locations,
            chunks: chunk_count,
            retriever,
        })
    }

    /// Ranked hits from a persisted collection.
    pub async fn query(
        &self,
        collection: &str,
        text: &str,
        top_k: Option<usize>,
    ) -> KbResult<Vec<RetrievedChunk>> {
        let mut options = BuildOptions::from_config(&self.config);
        if let Some(k) = top_k {
            options.top_k = k;
        }
        let retriever = index::open_retriever(self.store.as_ref(), collection, &options).await?;
        Ok(retriever.retrieve(text).await?)
    }

    pub async fn list_collections(&self) -> KbResult<Vec<String>> {
        Ok(self.store.list_collections().await?)
    }

    /// Evict down to `max` collections, or `store.max_collections`.
    pub async fn cleanup(&self, max: Option<usize>) -> KbResult<EvictionReport> {
        let max = max.unwrap_or(self.config.store.max_collections);
        lifecycle::evict_if_over_capacity(self.store.as_ref(), max).await
    }
}
