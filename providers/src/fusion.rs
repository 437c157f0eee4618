use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::{ErrorKind, ProviderError, classify_http_error};
use crate::lead::{Lead, normalize_phone};
use crate::provider::Provider;
use async_trait::async_trait;

const DEFAULT_BASE_URL: &str = "https://api.yelp.com/v3";

#[derive(Debug, thiserror::Error)]
pub enum FusionError {
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Yelp-Fusion-style business search with bearer authentication.
pub struct FusionProvider {
    http: Client,
    base_url: String,
    token: String,
}

impl FusionProvider {
    pub fn new(token: String) -> Result<Self, FusionError> {
        Self::with_base_url(token, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(token: String, base_url: String) -> Result<Self, FusionError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(9))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url,
            token,
        })
    }
}

#[async_trait]
impl Provider for FusionProvider {
    fn name(&self) -> &str {
        "fusion"
    }

    #[instrument(skip(self), fields(city = %city), level = "debug")]
    async fn search(
        &self,
        keyword: &str,
        city: &str,
        limit: u32,
    ) -> Result<Vec<Lead>, ProviderError> {
        let url = format!("{}/businesses/search", self.base_url);

        // Fusion caps a single page at 50.
        let page = limit.min(50).to_string();

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[
                ("term", keyword),
                ("location", city),
                ("limit", page.as_str()),
            ])
            .send()
            .await
            .map_err(|e| classify_http_error(&e))?;

        if resp.status().as_u16() == 429 {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);

            return Err(ProviderError::rate_limited(
                "fusion returned 429",
                retry_after,
            ));
        }

        let resp = resp.error_for_status().map_err(|e| classify_http_error(&e))?;

        let envelope: SearchEnvelope = resp
            .json()
            .await
            .map_err(|e| ProviderError::new(ErrorKind::Unknown, e.to_string()))?;

        let leads = map_businesses(envelope, limit);
        debug!(count = leads.len(), "fusion results mapped");
        Ok(leads)
    }
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    #[serde(default)]
    businesses: Vec<Business>,
}

#[derive(Debug, Deserialize)]
struct Business {
    #[serde(default)]
    name: String,
    #[serde(default)]
    location: Location,
    #[serde(default)]
    phone: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct Location {
    #[serde(default)]
    display_address: Vec<String>,
}

fn map_businesses(envelope: SearchEnvelope, limit: u32) -> Vec<Lead> {
    envelope
        .businesses
        .into_iter()
        .take(limit as usize)
        .map(|b| Lead {
            company: b.name,
            address: b.location.display_address.join(", "),
            phone: normalize_phone(&b.phone),
            email: String::new(),
            website: b.url,
        })
        .filter(Lead::is_valid)
        .collect()
}
