use async_trait::async_trait;

use crate::error::ProviderError;
use crate::lead::Lead;

/// Capability implemented by every search/directory adapter.
///
/// This trait intentionally hides:
/// - authentication and endpoint shapes
/// - pagination
/// - provider-specific error formats
///
/// Contract: on success a list of leads with `len <= limit` (possibly
/// empty); on failure a `ProviderError` carrying the shared taxonomy.
/// Returned phone numbers must already be digits-only including the country
/// code. Adapters own their email-backfill policy.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(
        &self,
        keyword: &str,
        city: &str,
        limit: u32,
    ) -> Result<Vec<Lead>, ProviderError>;
}
