use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::{ErrorKind, ProviderError, classify_http_error};
use crate::lead::{Lead, normalize_phone};
use crate::provider::Provider;
use async_trait::async_trait;

const DEFAULT_BASE_URL: &str = "https://maps.googleapis.com/maps/api/place";

/// How many hits get the extra details round-trip for phone/website.
/// Text search alone returns neither field.
const DETAIL_LOOKUPS: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum PlacesError {
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Google-Places-style text search.
///
/// Two-step per city: `textsearch` for the hit list, then a bounded number
/// of `details` calls to backfill phone and website. A failed details call
/// degrades the lead instead of failing the city.
pub struct PlacesProvider {
    http: Client,
    base_url: String,
    api_key: String,
}

impl PlacesProvider {
    pub fn new(api_key: String) -> Result<Self, PlacesError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, PlacesError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(9))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    async fn fetch_details(&self, place_id: &str) -> Option<PlaceDetails> {
        let url = format!("{}/details/json", self.base_url);

        let resp = self
            .http
            .get(&url)
            .query(&[
                ("place_id", place_id),
                ("fields", "formatted_phone_number,website"),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await
            .ok()?
            .error_for_status()
            .ok()?;

        let envelope: DetailsEnvelope = resp.json().await.ok()?;
        envelope.result
    }
}

#[async_trait]
impl Provider for PlacesProvider {
    fn name(&self) -> &str {
        "places"
    }

    #[instrument(skip(self), fields(city = %city), level = "debug")]
    async fn search(
        &self,
        keyword: &str,
        city: &str,
        limit: u32,
    ) -> Result<Vec<Lead>, ProviderError> {
        let url = format!("{}/textsearch/json", self.base_url);
        let query = format!("{keyword} in {city}");

        let resp = self
            .http
            .get(&url)
            .query(&[("query", query.as_str()), ("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| classify_http_error(&e))?
            .error_for_status()
            .map_err(|e| classify_http_error(&e))?;

        let envelope: SearchEnvelope = resp
            .json()
            .await
            .map_err(|e| ProviderError::new(ErrorKind::Unknown, e.to_string()))?;

        match envelope.status.as_str() {
            "OK" | "ZERO_RESULTS" => {}
            "OVER_QUERY_LIMIT" => {
                return Err(ProviderError::rate_limited(
                    "places OVER_QUERY_LIMIT",
                    Some(Duration::from_secs(30)),
                ));
            }
            other => {
                return Err(ProviderError::new(
                    ErrorKind::ApiError,
                    format!("places status {other}"),
                ));
            }
        }

        let mut leads = Vec::new();
        for hit in envelope.results.into_iter().take(limit as usize) {
            let details = match hit.place_id.as_deref() {
                Some(id) if leads.len() < DETAIL_LOOKUPS => self.fetch_details(id).await,
                _ => None,
            }
            .unwrap_or_default();

            let lead = Lead {
                company: hit.name,
                address: hit.formatted_address,
                phone: normalize_phone(&details.formatted_phone_number),
                email: String::new(),
                website: details.website,
            };

            if lead.is_valid() {
                leads.push(lead);
            }
        }

        debug!(count = leads.len(), "places results mapped");
        Ok(leads)
    }
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    #[serde(default)]
    status: String,
    #[serde(default)]
    results: Vec<PlaceHit>,
}

#[derive(Debug, Deserialize)]
struct PlaceHit {
    #[serde(default)]
    name: String,
    #[serde(default)]
    formatted_address: String,
    place_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailsEnvelope {
    result: Option<PlaceDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct PlaceDetails {
    #[serde(default)]
    formatted_phone_number: String,
    #[serde(default)]
    website: String,
}
