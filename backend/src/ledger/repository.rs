use anyhow::Result;
use async_trait::async_trait;

/// Persisted usage row for one provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistedUsage {
    pub provider: String,
    pub used: u64,
    pub period_start_ms: u64,
}

/// Durable side of the quota ledger.
///
/// Writes are best-effort: the ledger stays authoritative in memory and a
/// failed write must never abort a running attempt.
#[async_trait]
pub trait UsageRepository: Send + Sync {
    async fn load_all(&self) -> Result<Vec<PersistedUsage>>;

    async fn record(&self, provider: &str, used: u64, period_start_ms: u64) -> Result<()>;
}
