use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Progress rows surfaced to the UI, one per request chain.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS scrape_jobs (
  correlation_id TEXT PRIMARY KEY,
  keyword TEXT NOT NULL DEFAULT '',
  location TEXT NOT NULL DEFAULT '',
  target BIGINT NOT NULL DEFAULT 0,

  status TEXT NOT NULL,
  leads_count BIGINT NOT NULL,
  message TEXT NOT NULL,

  artifact_url TEXT NOT NULL DEFAULT '',
  completed_in_s BIGINT NOT NULL DEFAULT 0,

  updated_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Free-tier usage, one row per provider. The period start lets the
    // ledger decide whether a persisted `used` value predates the current
    // quota window.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS provider_usage (
  provider TEXT PRIMARY KEY,
  used BIGINT NOT NULL,
  period_start_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_scrape_jobs_status ON scrape_jobs(status);"#)
        .execute(pool)
        .await?;

    Ok(())
}
