//! Bounded breadth-first site crawler.
//!
//! A crawl starts from one seed URL, optionally seeds its frontier from the
//! site's `/sitemap.xml`, and walks same-origin links in FIFO order until the
//! frontier is empty or the page budget is reached. Every invocation owns its
//! own frontier and visited set and runs on its own tokio task, so the
//! politeness pauses only ever suspend that crawl.
//!
//! URLs are compared after stripping the fragment and query string. A URL is
//! collected when it is dequeued, before it is fetched, so pages that fail to
//! load still appear in the result.

use indexmap::IndexSet;
use rand::Rng;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{CrawlConfig, MAX_DELAY_SECS};
use crate::error::{KbError, KbResult};
use crate::fetch::Fetcher;
use crate::models::FetchedPage;

/// Failed fetches wait at most this much longer than `min_delay`.
const FAILURE_DELAY_SPAN_SECS: f64 = 1.0;

/// How far link-following may go from the seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlDepth {
    /// Stop on page budget only; depth is not tracked.
    Unbounded,
    /// Follow links at most this many hops from the seed.
    Limited(usize),
}

impl From<Option<usize>> for CrawlDepth {
    fn from(depth: Option<usize>) -> Self {
        match depth {
            Some(d) => CrawlDepth::Limited(d),
            None => CrawlDepth::Unbounded,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub depth: CrawlDepth,
    pub max_pages: usize,
    /// Politeness bounds, in seconds.
    pub min_delay: f64,
    pub max_delay: f64,
    /// Case-insensitive substring every followed URL must contain.
    pub url_keyword: Option<String>,
    pub sitemap_timeout: Duration,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self::from_config(&CrawlConfig::default())
    }
}

impl CrawlOptions {
    pub fn from_config(config: &CrawlConfig) -> Self {
        Self {
            depth: CrawlDepth::Unbounded,
            max_pages: config.max_pages,
            min_delay: config.min_delay,
            max_delay: config.max_delay,
            url_keyword: None,
            sitemap_timeout: Duration::from_secs(config.sitemap_timeout_secs),
        }
    }

    pub fn with_depth(mut self, depth: CrawlDepth) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_delays(mut self, min_delay: f64, max_delay: f64) -> Self {
        self.min_delay = min_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_url_keyword(mut self, keyword: Option<String>) -> Self {
        self.url_keyword = keyword.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn validate(&self) -> KbResult<()> {
        if self.max_pages == 0 {
            return Err(KbError::InvalidInput("max_pages must be >= 1".into()));
        }
        let finite = self.min_delay.is_finite() && self.max_delay.is_finite();
        if !(finite
            && self.min_delay >= 0.0
            && self.min_delay <= self.max_delay
            && self.max_delay <= MAX_DELAY_SECS)
        {
            return Err(KbError::InvalidInput(format!(
                "delay range [{}, {}] is invalid (bounds are 0 to {} seconds)",
                self.min_delay, self.max_delay, MAX_DELAY_SECS
            )));
        }
        Ok(())
    }

    fn keyword_allows(&self, url: &str) -> bool {
        match &self.url_keyword {
            Some(k) => url.to_lowercase().contains(&k.to_lowercase()),
            None => true,
        }
    }
}

/// Crawl `seed` on a dedicated task and return the collected URLs in
/// dequeue order.
pub async fn crawl(
    fetcher: Arc<dyn Fetcher>,
    seed: &str,
    options: CrawlOptions,
) -> KbResult<IndexSet<String>> {
    options.validate()?;
    let seed = parse_seed(seed)?;
    let handle = tokio::spawn(async move {
        let crawler = Crawler::new(fetcher.as_ref(), seed, &options);
        crawler.run().await
    });
    handle
        .await
        .map_err(|e| KbError::Other(anyhow::anyhow!("crawl task failed: {e}")))
}

fn parse_seed(seed: &str) -> KbResult<Url> {
    let url = Url::parse(seed.trim())
        .map_err(|e| KbError::InvalidInput(format!("invalid seed url '{seed}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(KbError::InvalidInput(format!(
            "seed url must be http or https: {seed}"
        )));
    }
    Ok(clean_url(url))
}

struct Crawler<'a> {
    fetcher: &'a dyn Fetcher,
    seed: Url,
    options: &'a CrawlOptions,
    frontier: VecDeque<(String, usize)>,
    visited: HashSet<String>,
    collected: IndexSet<String>,
}

impl<'a> Crawler<'a> {
    fn new(fetcher: &'a dyn Fetcher, seed: Url, options: &'a CrawlOptions) -> Self {
        Self {
            fetcher,
            seed,
            options,
            frontier: VecDeque::new(),
            visited: HashSet::new(),
            collected: IndexSet::new(),
        }
    }

    async fn run(mut self) -> IndexSet<String> {
        info!(
            seed = %self.seed,
            depth = ?self.options.depth,
            max_pages = self.options.max_pages,
            "Crawl starting"
        );

        match self.options.depth {
            CrawlDepth::Unbounded => {
                let sitemap = self.sitemap_urls().await;
                self.frontier.push_back((self.seed.to_string(), 0));
                self.frontier.extend(sitemap.into_iter().map(|u| (u, 0)));
            }
            CrawlDepth::Limited(0) => {
                self.frontier.push_back((self.seed.to_string(), 0));
            }
            CrawlDepth::Limited(_) => {
                let sitemap = self.sitemap_urls().await;
                let seed = self.seed.clone();
                let links = match self.fetch_links(&seed).await {
                    Some(links) => links.into_iter().collect::<IndexSet<_>>(),
                    None => IndexSet::new(),
                };
                debug!(url = %seed, links = links.len(), "Seed links harvested");
                self.frontier.extend(links.into_iter().map(|u| (u, 1)));
                self.frontier.extend(sitemap.into_iter().map(|u| (u, 1)));
            }
        }

        while let Some((url, depth)) = self.frontier.pop_front() {
            if self.collected.len() >= self.options.max_pages {
                break;
            }
            if self.visited.contains(&url) || !self.within_depth(depth) {
                continue;
            }

            self.visited.insert(url.clone());
            self.collected.insert(url.clone());

            let Ok(page_url) = Url::parse(&url) else {
                continue;
            };
            let Some(links) = self.fetch_links(&page_url).await else {
                continue;
            };
            if !self.may_expand(depth) {
                continue;
            }
            let mut queued = 0usize;
            for link in links {
                if !self.visited.contains(&link) {
                    self.frontier.push_back((link, depth + 1));
                    queued += 1;
                }
            }
            debug!(url = %url, depth, queued, "Links queued");
        }

        info!(
            seed = %self.seed,
            collected = self.collected.len(),
            visited = self.visited.len(),
            "Crawl finished"
        );
        self.collected
    }

    fn within_depth(&self, depth: usize) -> bool {
        match self.options.depth {
            CrawlDepth::Unbounded => true,
            CrawlDepth::Limited(max) => depth <= max,
        }
    }

    fn may_expand(&self, depth: usize) -> bool {
        match self.options.depth {
            CrawlDepth::Unbounded => true,
            CrawlDepth::Limited(max) => depth < max,
        }
    }

    /// Fetch a page and return its cleaned, same-origin, keyword-filtered
    /// links. `None` means the fetch failed. Always followed by a politeness
    /// pause.
    async fn fetch_links(&self, url: &Url) -> Option<Vec<String>> {
        match self.fetcher.fetch(url.as_str()).await {
            Ok(page) => {
                let base = Url::parse(&page.url).unwrap_or_else(|_| url.clone());
                let links = page_links(&base, &page)
                    .into_iter()
                    .filter(|link| same_origin(link, &self.seed))
                    .map(|link| clean_url(link).to_string())
                    .filter(|link| self.options.keyword_allows(link))
                    .collect::<Vec<_>>();
                debug!(url = %url, links = links.len(), "Page fetched");
                pause(self.options.min_delay, self.options.max_delay).await;
                Some(links)
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to fetch page");
                let upper = self
                    .options
                    .max_delay
                    .min(self.options.min_delay + FAILURE_DELAY_SPAN_SECS);
                pause(self.options.min_delay, upper).await;
                None
            }
        }
    }

    /// Same-origin `<loc>` entries from `/sitemap.xml`, capped at half the
    /// page budget, then keyword-filtered. Any failure yields an empty list.
    async fn sitemap_urls(&self) -> Vec<String> {
        let Ok(sitemap_url) = self.seed.join("/sitemap.xml") else {
            return Vec::new();
        };
        let fetched = tokio::time::timeout(
            self.options.sitemap_timeout,
            self.fetcher.fetch(sitemap_url.as_str()),
        )
        .await;
        let page = match fetched {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => {
                info!(url = %sitemap_url, error = %e, "No sitemap found");
                return Vec::new();
            }
            Err(_) => {
                info!(url = %sitemap_url, "Sitemap fetch timed out");
                return Vec::new();
            }
        };
        let locs = match parse_sitemap(&page.body) {
            Ok(locs) => locs,
            Err(e) => {
                info!(url = %sitemap_url, error = %e, "Sitemap could not be parsed");
                return Vec::new();
            }
        };
        let urls: Vec<String> = locs
            .iter()
            .filter_map(|loc| Url::parse(loc.trim()).ok())
            .filter(|u| same_origin(u, &self.seed))
            .map(|u| clean_url(u).to_string())
            .take(self.options.max_pages / 2)
            .filter(|u| self.options.keyword_allows(u))
            .collect();
        info!(url = %sitemap_url, count = urls.len(), "Sitemap URLs found");
        urls
    }
}

async fn pause(min: f64, max: f64) {
    let secs = if max > min {
        rand::thread_rng().gen_range(min..=max)
    } else {
        min
    };
    if secs > 0.0 {
        debug!(delay_secs = secs, "Politeness delay");
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }
}

/// Drop the fragment and query string.
pub fn clean_url(mut url: Url) -> Url {
    url.set_fragment(None);
    url.set_query(None);
    url
}

/// Scheme, host and port all match.
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}

fn page_links(base: &Url, page: &FetchedPage) -> Vec<Url> {
    let is_markup = page
        .content_type
        .as_deref()
        .map(|ct| ct.contains("html") || ct.contains("xml"))
        .unwrap_or(true);
    if !is_markup {
        return Vec::new();
    }
    extract_links(base, &String::from_utf8_lossy(&page.body))
}

/// Resolve `a[href]`, `frame[src]` and `iframe[src]` against `base`,
/// keeping only http(s) targets.
pub fn extract_links(base: &Url, html: &str) -> Vec<Url> {
    use scraper::{Html, Selector};

    let document = Html::parse_document(html);
    let mut links = Vec::new();
    let targets = [("a[href]", "href"), ("frame[src], iframe[src]", "src")];
    for (selector, attr) in targets {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        for element in document.select(&selector) {
            let Some(raw) = element.value().attr(attr) else {
                continue;
            };
            if let Ok(resolved) = base.join(raw.trim()) {
                if matches!(resolved.scheme(), "http" | "https") {
                    links.push(resolved);
                }
            }
        }
    }
    links
}

/// Text of every `<loc>` element, namespace-agnostic.
pub fn parse_sitemap(xml: &[u8]) -> Result<Vec<String>, quick_xml::Error> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut locs = Vec::new();
    let mut in_loc = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"loc" => in_loc = true,
            Event::End(e) if e.local_name().as_ref() == b"loc" => in_loc = false,
            Event::Text(t) if in_loc => {
                if let Ok(text) = t.unescape() {
                    locs.push(text.into_owned());
                }
            }
            Event::CData(c) if in_loc => {
                locs.push(String::from_utf8_lossy(&c.into_inner()).into_owned());
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(locs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_clean_url_strips_fragment_and_query() {
        let cleaned = clean_url(url("https://example.com/a/b?x=1&y=2#top"));
        assert_eq!(cleaned.as_str(), "https://example.com/a/b");
    }

    #[test]
    fn test_same_origin_requires_scheme_host_and_port() {
        let seed = url("https://example.com/");
        assert!(same_origin(&url("https://example.com/docs"), &seed));
        assert!(!same_origin(&url("http://example.com/docs"), &seed));
        assert!(!same_origin(&url("https://blog.example.com/"), &seed));
        assert!(!same_origin(&url("https://example.com:8443/"), &seed));
    }

    #[test]
    fn test_extract_links_anchors_and_frames() {
        let base = url("https://example.com/docs/");
        let html = r#"
            <a href="intro">Intro</a>
            <a href="/about#team">About</a>
            <a href="mailto:hi@example.com">Mail</a>
            <iframe src="https://example.com/embed"></iframe>
            <frame src="nav.html">
        "#;
        let links: Vec<String> = extract_links(&base, html)
            .into_iter()
            .map(|u| u.to_string())
            .collect();
        assert!(links.contains(&"https://example.com/docs/intro".to_string()));
        assert!(links.contains(&"https://example.com/about#team".to_string()));
        assert!(links.contains(&"https://example.com/embed".to_string()));
        assert!(!links.iter().any(|l| l.starts_with("mailto:")));
    }

    #[test]
    fn test_parse_sitemap_reads_namespaced_locs() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
            <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
              <url><loc>https://example.com/one</loc></url>
              <url><loc>https://example.com/two?ref=x</loc></url>
            </urlset>"#;
        let locs = parse_sitemap(xml).unwrap();
        assert_eq!(
            locs,
            vec!["https://example.com/one", "https://example.com/two?ref=x"]
        );
    }

    #[test]
    fn test_options_reject_inverted_delays() {
        let opts = CrawlOptions::from_config(&CrawlConfig::default()).with_delays(2.0, 1.0);
        assert!(matches!(opts.validate(), Err(KbError::InvalidInput(_))));
    }

    #[test]
    fn test_options_reject_huge_and_non_finite_delays() {
        let base = CrawlOptions::from_config(&CrawlConfig::default());
        for (min, max) in [(1.0, 1e300), (0.0, f64::INFINITY), (f64::NAN, 1.0)] {
            let opts = base.clone().with_delays(min, max);
            assert!(
                matches!(opts.validate(), Err(KbError::InvalidInput(_))),
                "({min}, {max}) accepted"
            );
        }
        assert!(base.with_delays(0.0, MAX_DELAY_SECS).validate().is_ok());
    }

    #[test]
    fn test_empty_url_keyword_is_ignored() {
        let opts =
            CrawlOptions::from_config(&CrawlConfig::default()).with_url_keyword(Some("  ".into()));
        assert!(opts.url_keyword.is_none());
        assert!(opts.keyword_allows("https://example.com/anything"));
    }

    #[test]
    fn test_keyword_match_is_case_insensitive() {
        let opts = CrawlOptions::from_config(&CrawlConfig::default())
            .with_url_keyword(Some("Docs".into()));
        assert!(opts.keyword_allows("https://example.com/DOCS/intro"));
        assert!(!opts.keyword_allows("https://example.com/blog"));
    }

    #[test]
    fn test_parse_seed_rejects_non_http() {
        assert!(parse_seed("ftp://example.com").is_err());
        assert!(parse_seed("not a url").is_err());
        assert_eq!(
            parse_seed("https://example.com/?q=1").unwrap().as_str(),
            "https://example.com/"
        );
    }
}
