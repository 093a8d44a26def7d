use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Directory holding the persistent index database.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_max_collections")]
    pub max_collections: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            max_collections: default_max_collections(),
        }
    }
}

impl StoreConfig {
    pub fn db_file(&self) -> PathBuf {
        self.path.join("kb.sqlite")
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./kb_store")
}
fn default_max_collections() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlConfig {
    #[serde(default = "default_min_delay")]
    pub min_delay: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay: f64,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_sitemap_timeout")]
    pub sitemap_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            min_delay: default_min_delay(),
            max_delay: default_max_delay(),
            max_pages: default_max_pages(),
            timeout_secs: default_fetch_timeout(),
            sitemap_timeout_secs: default_sitemap_timeout(),
            user_agent: default_user_agent(),
            fetch_concurrency: default_fetch_concurrency(),
        }
    }
}

fn default_min_delay() -> f64 {
    1.0
}
fn default_max_delay() -> f64 {
    3.0
}
fn default_max_pages() -> usize {
    100
}
fn default_fetch_timeout() -> u64 {
    15
}
fn default_sitemap_timeout() -> u64 {
    10
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36"
        .to_string()
}
fn default_fetch_concurrency() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_tokens")]
    pub chunk_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_tokens: default_chunk_tokens(),
            overlap_tokens: default_overlap_tokens(),
        }
    }
}

fn default_chunk_tokens() -> usize {
    512
}
fn default_overlap_tokens() -> usize {
    128
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            lexical_weight: default_lexical_weight(),
            semantic_weight: default_semantic_weight(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_lexical_weight() -> f64 {
    0.4
}
fn default_semantic_weight() -> f64 {
    0.6
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL override (Ollama host, or an OpenAI-compatible endpoint).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Shared token for admin routes. `KBH_ADMIN_TOKEN` takes precedence.
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            admin_token: None,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl ServerConfig {
    pub fn resolved_admin_token(&self) -> Option<String> {
        std::env::var("KBH_ADMIN_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| self.admin_token.clone().filter(|t| !t.is_empty()))
    }
}

/// Upper bound for any politeness pause, in seconds.
pub const MAX_DELAY_SECS: f64 = 600.0;

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Crawl politeness
    if !config.crawl.min_delay.is_finite() || !config.crawl.max_delay.is_finite() {
        anyhow::bail!("crawl delays must be finite numbers");
    }
    if config.crawl.min_delay < 0.0 {
        anyhow::bail!("crawl.min_delay must be >= 0");
    }
    if config.crawl.max_delay > MAX_DELAY_SECS {
        anyhow::bail!("crawl.max_delay must be <= {}", MAX_DELAY_SECS);
    }
    if config.crawl.min_delay > config.crawl.max_delay {
        anyhow::bail!("crawl.min_delay must be <= crawl.max_delay");
    }
    if config.crawl.max_pages == 0 {
        anyhow::bail!("crawl.max_pages must be >= 1");
    }
    if config.crawl.fetch_concurrency == 0 {
        anyhow::bail!("crawl.fetch_concurrency must be >= 1");
    }

    // Chunking
    if config.chunking.chunk_tokens == 0 {
        anyhow::bail!("chunking.chunk_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.chunk_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.chunk_tokens");
    }

    // Retrieval
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    let (lw, sw) = (
        config.retrieval.lexical_weight,
        config.retrieval.semantic_weight,
    );
    if lw < 0.0 || sw < 0.0 || lw + sw <= 0.0 {
        anyhow::bail!("retrieval weights must be >= 0 with a positive sum");
    }

    if config.store.max_collections == 0 {
        anyhow::bail!("store.max_collections must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    let needs_model = matches!(config.embedding.provider.as_str(), "openai" | "ollama");
    if needs_model && config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    Ok(())
}
