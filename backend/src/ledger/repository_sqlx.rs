use anyhow::Result;
use async_trait::async_trait;
use sqlx::{AnyPool, Row};

use crate::ledger::repository::{PersistedUsage, UsageRepository};

/// SQLx-backed implementation of `UsageRepository`.
/// Responsible only for persistence and row mapping.
pub struct SqlxUsageRepository {
    pool: AnyPool,
}

impl SqlxUsageRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageRepository for SqlxUsageRepository {
    async fn load_all(&self) -> Result<Vec<PersistedUsage>> {
        let rows = sqlx::query(
            r#"
SELECT provider, used, period_start_ms
FROM provider_usage;
"#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::new();
        for r in rows {
            let provider: String = r.try_get("provider")?;
            let used: i64 = r.try_get("used")?;
            let period_start_ms: i64 = r.try_get("period_start_ms")?;

            out.push(PersistedUsage {
                provider,
                used: used.max(0) as u64,
                period_start_ms: period_start_ms.max(0) as u64,
            });
        }

        Ok(out)
    }

    async fn record(&self, provider: &str, used: u64, period_start_ms: u64) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO provider_usage (provider, used, period_start_ms)
VALUES (?, ?, ?)
ON CONFLICT(provider) DO UPDATE SET
  used = excluded.used,
  period_start_ms = excluded.period_start_ms;
"#,
        )
        .bind(provider)
        .bind(used as i64)
        .bind(period_start_ms as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
