//! Fetcher boundary used by the crawler and the normalizer.
//!
//! [`HttpFetcher`] is the production implementation on top of `reqwest`.
//! [`StaticFetcher`] serves canned pages from memory and records every
//! request, which makes crawl order observable in tests and demos.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::CrawlConfig;
use crate::models::FetchedPage;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("timed out fetching {0}")]
    Timeout(String),
}

/// Retrieves raw bytes for a URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

/// `reqwest`-backed fetcher with browser-like default headers.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &CrawlConfig) -> anyhow::Result<Self> {
        use anyhow::Context;
        use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        debug!(url = %url, "HTTP fetch starting");
        let transport = |source: reqwest::Error| {
            if source.is_timeout() {
                FetchError::Timeout(url.to_string())
            } else {
                FetchError::Transport {
                    url: url.to_string(),
                    source,
                }
            }
        };

        let response = self.client.get(url).send().await.map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = response.bytes().await.map_err(transport)?;

        Ok(FetchedPage {
            url: final_url,
            content_type,
            body: body.to_vec(),
        })
    }
}

/// In-memory fetcher serving a fixed set of pages.
///
/// Unknown URLs answer with HTTP 404. Every call is appended to the request
/// log, including failed ones.
#[derive(Default)]
pub struct StaticFetcher {
    pages: HashMap<String, (Option<String>, Vec<u8>)>,
    requests: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(
        mut self,
        url: impl Into<String>,
        content_type: &str,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        self.pages
            .insert(url.into(), (Some(content_type.to_string()), body.into()));
        self
    }

    /// Convenience for an HTML page.
    pub fn with_html(self, url: impl Into<String>, html: &str) -> Self {
        self.with_page(url, "text/html; charset=utf-8", html.as_bytes().to_vec())
    }

    /// URLs requested so far, in call order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(url.to_string());
        }
        match self.pages.get(url) {
            Some((content_type, body)) => Ok(FetchedPage {
                url: url.to_string(),
                content_type: content_type.clone(),
                body: body.clone(),
            }),
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}
