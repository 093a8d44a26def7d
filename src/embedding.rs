//! Embedding capability interfaces and providers.
//!
//! Two capabilities exist:
//! - **[`BulkEmbedder`]** embeds a list of texts per call (OpenAI, local fastembed).
//! - **[`SingleEmbedder`]** embeds one text per call (Ollama's `/api/embeddings`).
//!
//! [`Embedder`] is resolved once from configuration and carries whichever
//! capability the provider offers; callers match on it instead of probing
//! for methods at runtime.
//!
//! Also provides the vector helpers used by the SQLite store:
//! [`vec_to_blob`], [`blob_to_vec`] and [`cosine_similarity`].
//!
//! # Retry Strategy
//!
//! The HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
#[cfg(feature = "local-embeddings-fastembed")]
const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

#[async_trait]
pub trait BulkEmbedder: Send + Sync {
    fn model_name(&self) -> &str;
    /// One vector per input text, in input order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[async_trait]
pub trait SingleEmbedder: Send + Sync {
    fn model_name(&self) -> &str;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// The embedding capability selected for this process.
#[derive(Clone)]
pub enum Embedder {
    Bulk(Arc<dyn BulkEmbedder>),
    Single(Arc<dyn SingleEmbedder>),
    /// No semantic index; retrieval is lexical only.
    Disabled,
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Embedder::Bulk(e) => write!(f, "Embedder::Bulk({})", e.model_name()),
            Embedder::Single(e) => write!(f, "Embedder::Single({})", e.model_name()),
            Embedder::Disabled => write!(f, "Embedder::Disabled"),
        }
    }
}

impl Embedder {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        match config.provider.as_str() {
            "disabled" => Ok(Embedder::Disabled),
            "openai" => Ok(Embedder::Bulk(Arc::new(OpenAIEmbedder::new(config)?))),
            "ollama" => Ok(Embedder::Single(Arc::new(OllamaEmbedder::new(config)?))),
            #[cfg(feature = "local-embeddings-fastembed")]
            "local" => Ok(Embedder::Bulk(Arc::new(LocalEmbedder::new(config)?))),
            #[cfg(not(feature = "local-embeddings-fastembed"))]
            "local" => bail!(
                "Local embedding provider requires --features local-embeddings-fastembed"
            ),
            other => bail!("Unknown embedding provider: {}", other),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Embedder::Disabled)
    }

    pub fn model_name(&self) -> &str {
        match self {
            Embedder::Bulk(e) => e.model_name(),
            Embedder::Single(e) => e.model_name(),
            Embedder::Disabled => "disabled",
        }
    }

    /// Embed one text through whichever capability is available.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        match self {
            Embedder::Bulk(e) => e
                .embed_documents(&[text.to_string()])
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| anyhow::anyhow!("Empty embedding response")),
            Embedder::Single(e) => e.embed(text).await,
            Embedder::Disabled => bail!("Embedding provider is disabled"),
        }
    }

    /// Embed many texts: batched for bulk providers, sequential otherwise.
    pub async fn embed_all(&self, texts: &[String], batch_size: usize) -> Result<Vec<Vec<f32>>> {
        match self {
            Embedder::Bulk(e) => {
                let mut out = Vec::with_capacity(texts.len());
                for batch in texts.chunks(batch_size.max(1)) {
                    let vectors = e.embed_documents(batch).await?;
                    if vectors.len() != batch.len() {
                        bail!(
                            "Embedding count mismatch: sent {}, received {}",
                            batch.len(),
                            vectors.len()
                        );
                    }
                    out.extend(vectors);
                }
                Ok(out)
            }
            Embedder::Single(e) => {
                let mut out = Vec::with_capacity(texts.len());
                for text in texts {
                    out.push(e.embed(text).await?);
                }
                Ok(out)
            }
            Embedder::Disabled => bail!("Embedding provider is disabled"),
        }
    }
}

// ============ HTTP helpers ============

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

/// POST `body` as JSON, retrying transient failures with exponential backoff.
async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(provider = label, attempt, delay_secs = delay.as_secs(), "Retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow::anyhow!("{} API error {}: {}", label, status, body_text));
                    continue;
                }
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!("{} connection error at {}: {}", label, url, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} embedding failed after retries", label)))
}

fn json_vector(value: &serde_json::Value) -> Option<Vec<f32>> {
    value
        .as_array()
        .map(|arr| arr.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
}

// ============ OpenAI (bulk) ============

pub struct OpenAIEmbedder {
    client: reqwest::Client,
    model: String,
    api_key: String,
    url: String,
    max_retries: u32,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base = config.url.as_deref().unwrap_or(DEFAULT_OPENAI_URL);

        Ok(Self {
            client: http_client(config)?,
            model,
            api_key,
            url: format!("{}/embeddings", base.trim_end_matches('/')),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl BulkEmbedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json_with_retry(
            &self.client,
            &self.url,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_response(&json)
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(json_vector)
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, embedding));
    }

    // Sort by index to ensure order matches input
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama (single) ============

pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    url: String,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let base = config.url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL);

        Ok(Self {
            client: http_client(config)?,
            model,
            url: format!("{}/api/embeddings", base.trim_end_matches('/')),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl SingleEmbedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });
        let json =
            post_json_with_retry(&self.client, &self.url, None, &body, self.max_retries, "Ollama")
                .await?;
        json.get("embedding")
            .and_then(json_vector)
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embedding"))
    }
}

// ============ Local (fastembed) ============

/// Runs an ONNX sentence-embedding model in-process via fastembed.
///
/// The model is downloaded from Hugging Face and cached on first use, then
/// kept loaded for the life of the embedder. After the download no network
/// calls are made.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model_name: String,
    model: fastembed::EmbeddingModel,
    batch_size: usize,
    loaded: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());
        let model = config_to_fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            model,
            batch_size: config.batch_size,
            loaded: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl BulkEmbedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let texts = texts.to_vec();
        let model = self.model.clone();
        let batch_size = self.batch_size;
        let loaded = self.loaded.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = loaded
                .lock()
                .map_err(|_| anyhow::anyhow!("Local embedding model lock poisoned"))?;
            if guard.is_none() {
                let initialized = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(model).with_show_download_progress(true),
                )
                .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
                *guard = Some(initialized);
            }
            let Some(embedding) = guard.as_mut() else {
                bail!("Local embedding model unavailable");
            };
            embedding
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

// ============ Vector Utilities ============

/// Encode a float vector as little-endian bytes for a SQLite BLOB.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}


/// Feature-hashing bag-of-words vectors for unit tests: deterministic and
/// offline, with similarity driven by shared words.
#[cfg(test)]
pub(crate) struct HashingEmbedder {
    dims: usize,
}

#[cfg(test)]
impl HashingEmbedder {
    pub(crate) fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        use sha2::{Digest, Sha256};

        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let bucket = u16::from_le_bytes([digest[0], digest[1]]) as usize % self.dims;
            v[bucket] += 1.0;
        }
        v
    }
}

#[cfg(test)]
#[async_trait]
impl BulkEmbedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing"
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}
