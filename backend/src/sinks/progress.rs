use anyhow::Result;
use async_trait::async_trait;
use sqlx::AnyPool;

use crate::time::now_ms;

/// Durable progress record keyed by correlation id.
///
/// Writes are last-writer-wins and idempotent in content; the UI polls
/// this row. Failures here are infrastructure errors and propagate (the
/// caller decides whether they are fatal for the session).
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Creates (or refreshes) the row when a request chain starts.
    async fn begin(
        &self,
        correlation_id: &str,
        keyword: &str,
        location: &str,
        target: u64,
    ) -> Result<()>;

    async fn update(&self, correlation_id: &str, leads: u64, message: &str) -> Result<()>;

    async fn completed(
        &self,
        correlation_id: &str,
        link: &str,
        completed_in_s: u64,
        leads: u64,
        message: &str,
    ) -> Result<()>;

    async fn error(&self, correlation_id: &str, error: &str) -> Result<()>;
}

/// SQLx-backed implementation over the `scrape_jobs` table.
/// Responsible only for persistence; no session logic.
pub struct SqlxProgressSink {
    pool: AnyPool,
}

impl SqlxProgressSink {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProgressSink for SqlxProgressSink {
    async fn begin(
        &self,
        correlation_id: &str,
        keyword: &str,
        location: &str,
        target: u64,
    ) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO scrape_jobs (correlation_id, keyword, location, target, status, leads_count, message, updated_ms)
VALUES (?, ?, ?, ?, 'running', 0, 'starting', ?)
ON CONFLICT(correlation_id) DO UPDATE SET
  keyword = excluded.keyword,
  location = excluded.location,
  target = excluded.target,
  status = 'running',
  updated_ms = excluded.updated_ms;
"#,
        )
        .bind(correlation_id)
        .bind(keyword)
        .bind(location)
        .bind(target as i64)
        .bind(now_ms() as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, correlation_id: &str, leads: u64, message: &str) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO scrape_jobs (correlation_id, status, leads_count, message, updated_ms)
VALUES (?, 'running', ?, ?, ?)
ON CONFLICT(correlation_id) DO UPDATE SET
  status = 'running',
  leads_count = excluded.leads_count,
  message = excluded.message,
  updated_ms = excluded.updated_ms;
"#,
        )
        .bind(correlation_id)
        .bind(leads as i64)
        .bind(message)
        .bind(now_ms() as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn completed(
        &self,
        correlation_id: &str,
        link: &str,
        completed_in_s: u64,
        leads: u64,
        message: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO scrape_jobs (correlation_id, status, leads_count, message, artifact_url, completed_in_s, updated_ms)
VALUES (?, 'completed', ?, ?, ?, ?, ?)
ON CONFLICT(correlation_id) DO UPDATE SET
  status = 'completed',
  leads_count = excluded.leads_count,
  message = excluded.message,
  artifact_url = excluded.artifact_url,
  completed_in_s = excluded.completed_in_s,
  updated_ms = excluded.updated_ms;
"#,
        )
        .bind(correlation_id)
        .bind(leads as i64)
        .bind(message)
        .bind(link)
        .bind(completed_in_s as i64)
        .bind(now_ms() as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn error(&self, correlation_id: &str, error: &str) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO scrape_jobs (correlation_id, status, leads_count, message, updated_ms)
VALUES (?, 'error', 0, ?, ?)
ON CONFLICT(correlation_id) DO UPDATE SET
  status = 'error',
  message = excluded.message,
  updated_ms = excluded.updated_ms;
"#,
        )
        .bind(correlation_id)
        .bind(error)
        .bind(now_ms() as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
