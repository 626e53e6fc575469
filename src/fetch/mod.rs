// src/fetch/mod.rs
pub mod parse;
pub mod resolve;

use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::Client;
use std::time::Duration;

use crate::config::Settings;
use crate::outcome::RunErrorKind;
use crate::source::Source;

/// One feed entry, normalized. Transient: lives only within a poll run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedItem {
    pub source_id: String,
    pub link: String,
    pub title: String,
    /// Unix seconds; feeds frequently omit or mangle dates.
    pub published_at: Option<i64>,
    pub summary: String,
}

#[derive(Debug, Clone)]
pub enum FetchError {
    Resolution(String),
    Timeout(String),
    Http(String),
    Parse(String),
}

impl FetchError {
    pub fn kind(&self) -> RunErrorKind {
        match self {
            FetchError::Resolution(_) => RunErrorKind::Resolution,
            FetchError::Timeout(_) => RunErrorKind::Timeout,
            FetchError::Http(_) => RunErrorKind::Fetch,
            FetchError::Parse(_) => RunErrorKind::Parse,
        }
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Resolution(s)
            | FetchError::Timeout(s)
            | FetchError::Http(s)
            | FetchError::Parse(s) => write!(f, "{s}"),
        }
    }
}

#[async_trait]
pub trait FetchFeed: Send + Sync {
    async fn fetch(&self, source: &Source) -> Result<Vec<NormalizedItem>, FetchError>;
}

/// Real fetcher: resolve, retrieve with a bounded timeout, parse.
pub struct Fetcher {
    client: Client,
    hub_base: String,
}

impl Fetcher {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(&settings.user_agent)
            .timeout(Duration::from_secs(settings.fetch_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            hub_base: settings.feed_hub_base.clone(),
        })
    }
}

#[async_trait]
impl FetchFeed for Fetcher {
    async fn fetch(&self, source: &Source) -> Result<Vec<NormalizedItem>, FetchError> {
        let url = resolve::resolve_feed_url(source, &self.hub_base)
            .map_err(|e| FetchError::Resolution(e.to_string()))?;

        let t0 = std::time::Instant::now();
        let resp = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(format!("GET {url} timed out"))
            } else {
                FetchError::Http(format!("GET {url}: {e}"))
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Http(format!("GET {url}: HTTP {status}")));
        }

        let body = resp.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(format!("GET {url} body timed out"))
            } else {
                FetchError::Http(format!("GET {url} body: {e}"))
            }
        })?;
        histogram!("flux_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        let items = parse::parse_feed(&body, &source.id)
            .map_err(|e| FetchError::Parse(e.to_string()))?;
        counter!("flux_items_fetched_total").increment(items.len() as u64);
        Ok(items)
    }
}
