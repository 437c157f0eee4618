use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::error::{ErrorKind, ProviderError, classify_http_error};
use crate::lead::{Lead, normalize_phone};
use crate::provider::Provider;
use async_trait::async_trait;

const DEFAULT_BASE_URL: &str = "https://serpapi.com";
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum SerpError {
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// SerpAPI-style local-results search.
///
/// The adapter keeps an internal back-off that doubles on every 429 and
/// resets on the first successful call; the suggested delay is also
/// surfaced to the caller through `ProviderError::retry_after`.
pub struct SerpProvider {
    http: Client,
    base_url: String,
    api_key: String,
    backoff: Mutex<Duration>,
}

impl SerpProvider {
    pub fn new(api_key: String) -> Result<Self, SerpError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, SerpError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(9))
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url,
            api_key,
            backoff: Mutex::new(Duration::ZERO),
        })
    }

    fn bump_backoff(&self) -> Duration {
        let mut guard = self.backoff.lock();
        *guard = if guard.is_zero() {
            Duration::from_secs(1)
        } else {
            (*guard * 2).min(MAX_BACKOFF)
        };
        *guard
    }

    fn clear_backoff(&self) {
        *self.backoff.lock() = Duration::ZERO;
    }
}

#[async_trait]
impl Provider for SerpProvider {
    fn name(&self) -> &str {
        "serp"
    }

    #[instrument(skip(self), fields(city = %city), level = "debug")]
    async fn search(
        &self,
        keyword: &str,
        city: &str,
        limit: u32,
    ) -> Result<Vec<Lead>, ProviderError> {
        let wait = *self.backoff.lock();
        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "serp back-off active");
            tokio::time::sleep(wait).await;
        }

        let url = format!("{}/search.json", self.base_url);
        let query = format!("{keyword} in {city}");
        let num = limit.to_string();

        let resp = self
            .http
            .get(&url)
            .query(&[
                ("engine", "google_local"),
                ("q", query.as_str()),
                ("num", num.as_str()),
                ("api_key", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| classify_http_error(&e))?;

        if resp.status().as_u16() == 429 {
            let delay = self.bump_backoff();
            warn!(delay_s = delay.as_secs(), "serp rate limited");
            return Err(ProviderError::rate_limited(
                "serp returned 429",
                Some(delay),
            ));
        }

        let resp = resp.error_for_status().map_err(|e| classify_http_error(&e))?;

        let envelope: SearchEnvelope = resp
            .json()
            .await
            .map_err(|e| ProviderError::new(ErrorKind::Unknown, e.to_string()))?;

        self.clear_backoff();

        let leads = map_local_results(envelope, limit);
        debug!(count = leads.len(), "serp results mapped");
        Ok(leads)
    }
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    #[serde(default)]
    local_results: Vec<LocalResult>,
}

#[derive(Debug, Deserialize)]
struct LocalResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    phone: String,
    #[serde(default)]
    links: Links,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    website: String,
}

fn map_local_results(envelope: SearchEnvelope, limit: u32) -> Vec<Lead> {
    envelope
        .local_results
        .into_iter()
        .take(limit as usize)
        .map(|r| Lead {
            company: r.title,
            address: r.address,
            phone: normalize_phone(&r.phone),
            // SerpAPI local results never carry emails; left for downstream
            // enrichment.
            email: String::new(),
            website: r.links.website,
        })
        .filter(Lead::is_valid)
        .collect()
}
