//! Provider registry and quota ledger.
//!
//! Responsibilities:
//! - Track remaining free-tier credits per provider, honouring each
//!   provider's reset cadence at read time.
//! - Hand out reservations before an attempt and settle them afterwards
//!   (reserve-then-commit), so concurrent attempts can never overspend.
//! - Persist usage best-effort through `UsageRepository`.
//!
//! Non-responsibilities:
//! - Deciding how credits are spent (planner).
//! - Calling providers (dispatcher).

pub mod model;
pub mod repository;
pub mod repository_sqlx;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::ledger::model::{LedgerSnapshot, ProviderCredits, ProviderQuota};
use crate::ledger::repository::UsageRepository;

pub struct QuotaLedger {
    quotas: Mutex<HashMap<String, ProviderQuota>>,
    repo: Option<Arc<dyn UsageRepository>>,
}

impl QuotaLedger {
    pub fn new(quotas: Vec<ProviderQuota>) -> Self {
        let map = quotas.into_iter().map(|q| (q.name.clone(), q)).collect();

        Self {
            quotas: Mutex::new(map),
            repo: None,
        }
    }

    pub fn with_repository(mut self, repo: Arc<dyn UsageRepository>) -> Self {
        self.repo = Some(repo);
        self
    }

    /// Overlays persisted usage onto the in-memory registry. Rows for
    /// providers that are no longer configured are ignored.
    pub async fn hydrate(&self) -> anyhow::Result<()> {
        let Some(repo) = &self.repo else {
            return Ok(());
        };

        let rows = repo.load_all().await?;
        let mut quotas = self.quotas.lock();

        for row in rows {
            if let Some(q) = quotas.get_mut(&row.provider) {
                q.used = row.used.min(q.credits_total);
                q.period_start_ms = row.period_start_ms;
            }
        }

        Ok(())
    }

    /// Availability partition at `now_ms`. Both halves are name-sorted so
    /// downstream ordering decisions are deterministic.
    pub fn snapshot(&self, now_ms: u64) -> LedgerSnapshot {
        let quotas = self.quotas.lock();

        let mut available = Vec::new();
        let mut exhausted = Vec::new();

        for q in quotas.values() {
            let credits = ProviderCredits {
                name: q.name.clone(),
                remaining: q.remaining(now_ms),
                total: q.credits_total,
                used: q.effective_used(now_ms),
                reset_policy: q.reset_policy,
            };

            if credits.remaining > 0 {
                available.push(credits);
            } else {
                exhausted.push(credits);
            }
        }

        available.sort_by(|a, b| a.name.cmp(&b.name));
        exhausted.sort_by(|a, b| a.name.cmp(&b.name));

        LedgerSnapshot {
            available,
            exhausted,
        }
    }

    /// Atomically grants up to `n` credits. The grant may be smaller than
    /// asked when the cap is near; exhaustion is a soft failure (grant 0),
    /// never an error.
    #[instrument(skip(self), target = "ledger")]
    pub fn reserve(&self, name: &str, n: u64, now_ms: u64) -> u64 {
        let mut quotas = self.quotas.lock();

        let Some(q) = quotas.get_mut(name) else {
            warn!(provider = name, "reserve against unknown provider");
            return 0;
        };

        q.roll_if_elapsed(now_ms);

        let granted = n.min(q.remaining(now_ms));
        q.reserved += granted;

        debug!(provider = name, requested = n, granted, "credits reserved");
        granted
    }

    /// Settles a reservation: `used` credits are consumed, the rest of the
    /// reservation returns to the pool. `used` is clamped to the
    /// reservation so a cancelled or double-settled attempt can never
    /// consume more than it reserved.
    ///
    /// Persistence is best-effort; the error is returned for logging but
    /// the in-memory ledger has already settled.
    #[instrument(skip(self), target = "ledger")]
    pub async fn commit(&self, name: &str, reserved: u64, used: u64) -> anyhow::Result<()> {
        let (used_total, period_start_ms) = {
            let mut quotas = self.quotas.lock();

            let Some(q) = quotas.get_mut(name) else {
                warn!(provider = name, "commit against unknown provider");
                return Ok(());
            };

            if used > reserved {
                warn!(
                    provider = name,
                    used, reserved, "commit exceeds reservation; clamping"
                );
            }

            let consumed = used.min(reserved);
            q.reserved = q.reserved.saturating_sub(reserved);
            q.used = (q.used + consumed).min(q.credits_total);

            debug!(
                provider = name,
                consumed,
                released = reserved - consumed,
                "reservation settled"
            );

            (q.used, q.period_start_ms)
        };

        if let Some(repo) = &self.repo {
            repo.record(name, used_total, period_start_ms).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::model::ResetPolicy;
    use crate::ledger::repository::PersistedUsage;
    use parking_lot::Mutex as PlMutex;

    fn mk_ledger(caps: &[(&str, u64)]) -> QuotaLedger {
        QuotaLedger::new(
            caps.iter()
                .map(|(name, total)| ProviderQuota::new(*name, *total, ResetPolicy::Fixed))
                .collect(),
        )
    }

    #[test]
    fn snapshot_partitions_by_availability() {
        let ledger = mk_ledger(&[("a", 10), ("b", 0)]);
        let snapshot = ledger.snapshot(0);

        assert_eq!(snapshot.available.len(), 1);
        assert_eq!(snapshot.available[0].name, "a");
        assert_eq!(snapshot.exhausted.len(), 1);
        assert_eq!(snapshot.exhausted[0].name, "b");
    }

    #[test]
    fn reserve_grants_at_most_remaining() {
        let ledger = mk_ledger(&[("a", 7)]);

        assert_eq!(ledger.reserve("a", 5, 0), 5);
        assert_eq!(ledger.reserve("a", 5, 0), 2, "cap is near; partial grant");
        assert_eq!(ledger.reserve("a", 5, 0), 0, "soft failure on exhaustion");
        assert_eq!(ledger.reserve("ghost", 5, 0), 0);
    }

    #[tokio::test]
    async fn commit_consumes_used_and_releases_the_rest() {
        let ledger = mk_ledger(&[("a", 10)]);

        let granted = ledger.reserve("a", 6, 0);
        assert_eq!(granted, 6);
        assert_eq!(ledger.snapshot(0).get("a").unwrap().remaining, 4);

        ledger.commit("a", granted, 2).await.unwrap();

        let snap = ledger.snapshot(0);
        let a = snap.get("a").unwrap();
        assert_eq!(a.used, 2);
        assert_eq!(a.remaining, 8, "unused reservation returned to the pool");
    }

    #[tokio::test]
    async fn commit_clamps_overuse_to_reservation() {
        let ledger = mk_ledger(&[("a", 10)]);

        let granted = ledger.reserve("a", 3, 0);
        ledger.commit("a", granted, 9).await.unwrap();

        let snap = ledger.snapshot(0);
        assert_eq!(snap.get("a").unwrap().used, 3);
        assert_eq!(snap.get("a").unwrap().remaining, 7);
    }

    #[test]
    fn reserve_rolls_elapsed_window_first() {
        let day = 24 * 60 * 60 * 1000;
        let mut q = ProviderQuota::new("a", 10, ResetPolicy::Daily);
        q.used = 10;
        q.period_start_ms = 0;

        let ledger = QuotaLedger::new(vec![q]);

        // Window elapsed: the full tier is reservable again.
        assert_eq!(ledger.reserve("a", 4, day + 1), 4);
        let snap = ledger.snapshot(day + 1);
        assert_eq!(snap.get("a").unwrap().remaining, 6);
    }

    struct MemoryRepo {
        rows: PlMutex<Vec<PersistedUsage>>,
        fail_writes: bool,
    }

    #[async_trait::async_trait]
    impl UsageRepository for MemoryRepo {
        async fn load_all(&self) -> anyhow::Result<Vec<PersistedUsage>> {
            Ok(self.rows.lock().clone())
        }

        async fn record(&self, provider: &str, used: u64, period_start_ms: u64) -> anyhow::Result<()> {
            if self.fail_writes {
                return Err(anyhow::anyhow!("disk full"));
            }
            self.rows.lock().push(PersistedUsage {
                provider: provider.to_string(),
                used,
                period_start_ms,
            });
            Ok(())
        }
    }

    #[tokio::test]
    async fn hydrate_overlays_persisted_usage() {
        let repo = Arc::new(MemoryRepo {
            rows: PlMutex::new(vec![
                PersistedUsage {
                    provider: "a".into(),
                    used: 4,
                    period_start_ms: 99,
                },
                PersistedUsage {
                    provider: "ghost".into(),
                    used: 1,
                    period_start_ms: 0,
                },
            ]),
            fail_writes: false,
        });

        let ledger = mk_ledger(&[("a", 10)]).with_repository(repo);
        ledger.hydrate().await.unwrap();

        let snap = ledger.snapshot(0);
        assert_eq!(snap.get("a").unwrap().used, 4);
        assert_eq!(snap.get("a").unwrap().remaining, 6);
        assert!(snap.get("ghost").is_none());
    }

    #[tokio::test]
    async fn persistence_failure_still_settles_in_memory() {
        let repo = Arc::new(MemoryRepo {
            rows: PlMutex::new(vec![]),
            fail_writes: true,
        });

        let ledger = mk_ledger(&[("a", 10)]).with_repository(repo);

        let granted = ledger.reserve("a", 5, 0);
        let out = ledger.commit("a", granted, 5).await;

        assert!(out.is_err(), "write failure surfaces upward");
        assert_eq!(
            ledger.snapshot(0).get("a").unwrap().used,
            5,
            "in-memory ledger settled despite the failed write"
        );
    }
}
