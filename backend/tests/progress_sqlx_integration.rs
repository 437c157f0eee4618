use std::sync::Arc;

use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use backend::{
    db::schema,
    ledger::{
        QuotaLedger,
        model::{ProviderQuota, ResetPolicy},
        repository::UsageRepository,
        repository_sqlx::SqlxUsageRepository,
    },
    sinks::{ProgressSink, SqlxProgressSink},
};

// -----------------------
// DB + helpers
// -----------------------

/// Isolated in-memory DB per test.
/// Unique name prevents test interference during parallel execution.
/// `cache=shared` lets every connection in the pool see the same database.
async fn setup_db() -> AnyPool {
    sqlx::any::install_default_drivers();

    let db_name = Uuid::new_v4().to_string();
    let conn = format!("sqlite:file:{}?mode=memory&cache=shared", db_name);

    let pool = AnyPoolOptions::new()
        .max_connections(5)
        .connect(&conn)
        .await
        .expect("connect sqlite memory db");

    schema::migrate(&pool).await.expect("migrate schema");

    pool
}

async fn job_row(pool: &AnyPool, correlation_id: &str) -> (String, i64, String, String) {
    let row = sqlx::query(
        r#"
SELECT status, leads_count, message, artifact_url
FROM scrape_jobs
WHERE correlation_id = ?;
"#,
    )
    .bind(correlation_id)
    .fetch_one(pool)
    .await
    .expect("job row exists");

    (
        row.try_get("status").unwrap(),
        row.try_get("leads_count").unwrap(),
        row.try_get("message").unwrap(),
        row.try_get("artifact_url").unwrap(),
    )
}

// -----------------------
// Progress sink
// -----------------------

#[tokio::test]
async fn begin_update_completed_lifecycle() {
    let pool = setup_db().await;
    let sink = SqlxProgressSink::new(pool.clone());

    sink.begin("corr-1", "dentist", "Brandenburg", 50)
        .await
        .unwrap();

    let (status, leads, _, _) = job_row(&pool, "corr-1").await;
    assert_eq!(status, "running");
    assert_eq!(leads, 0);

    sink.update("corr-1", 12, "12 leads so far").await.unwrap();

    let (status, leads, message, _) = job_row(&pool, "corr-1").await;
    assert_eq!(status, "running");
    assert_eq!(leads, 12);
    assert_eq!(message, "12 leads so far");

    sink.completed("corr-1", "file:///tmp/corr-1.csv", 81, 50, "done")
        .await
        .unwrap();

    let (status, leads, message, url) = job_row(&pool, "corr-1").await;
    assert_eq!(status, "completed");
    assert_eq!(leads, 50);
    assert_eq!(message, "done");
    assert_eq!(url, "file:///tmp/corr-1.csv");
}

#[tokio::test]
async fn update_without_begin_creates_the_row() {
    let pool = setup_db().await;
    let sink = SqlxProgressSink::new(pool.clone());

    sink.update("corr-2", 7, "mid-chain session").await.unwrap();

    let (status, leads, _, _) = job_row(&pool, "corr-2").await;
    assert_eq!(status, "running");
    assert_eq!(leads, 7);
}

#[tokio::test]
async fn error_overwrites_the_status() {
    let pool = setup_db().await;
    let sink = SqlxProgressSink::new(pool.clone());

    sink.begin("corr-3", "dentist", "Brandenburg", 10)
        .await
        .unwrap();
    sink.error("corr-3", "ledger write failed").await.unwrap();

    let (status, _, message, _) = job_row(&pool, "corr-3").await;
    assert_eq!(status, "error");
    assert_eq!(message, "ledger write failed");
}

#[tokio::test]
async fn updates_are_last_writer_wins() {
    let pool = setup_db().await;
    let sink = SqlxProgressSink::new(pool.clone());

    sink.update("corr-4", 3, "three").await.unwrap();
    sink.update("corr-4", 9, "nine").await.unwrap();
    sink.update("corr-4", 9, "nine").await.unwrap();

    let (_, leads, message, _) = job_row(&pool, "corr-4").await;
    assert_eq!(leads, 9);
    assert_eq!(message, "nine");

    let count: i64 = sqlx::query(r#"SELECT COUNT(*) AS n FROM scrape_jobs;"#)
        .fetch_one(&pool)
        .await
        .unwrap()
        .try_get("n")
        .unwrap();
    assert_eq!(count, 1, "one durable record per correlation id");
}

// -----------------------
// Usage repository
// -----------------------

#[tokio::test]
async fn usage_rows_upsert_and_load() {
    let pool = setup_db().await;
    let repo = SqlxUsageRepository::new(pool.clone());

    repo.record("serp", 10, 1_000).await.unwrap();
    repo.record("serp", 25, 1_000).await.unwrap();
    repo.record("places", 3, 2_000).await.unwrap();

    let mut rows = repo.load_all().await.unwrap();
    rows.sort_by(|a, b| a.provider.cmp(&b.provider));

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].provider, "places");
    assert_eq!(rows[0].used, 3);
    assert_eq!(rows[1].provider, "serp");
    assert_eq!(rows[1].used, 25, "second write wins");
    assert_eq!(rows[1].period_start_ms, 1_000);
}

#[tokio::test]
async fn ledger_usage_survives_a_restart() {
    let pool = setup_db().await;
    let repo = Arc::new(SqlxUsageRepository::new(pool.clone()));

    // First process: spend some credits.
    let ledger = QuotaLedger::new(vec![ProviderQuota::new("serp", 100, ResetPolicy::Fixed)])
        .with_repository(repo.clone());

    let granted = ledger.reserve("serp", 40, 0);
    ledger.commit("serp", granted, 40).await.unwrap();

    // Second process: hydrate from the same table.
    let restarted = QuotaLedger::new(vec![ProviderQuota::new("serp", 100, ResetPolicy::Fixed)])
        .with_repository(repo);
    restarted.hydrate().await.unwrap();

    let snapshot = restarted.snapshot(0);
    assert_eq!(snapshot.get("serp").unwrap().used, 40);
    assert_eq!(snapshot.get("serp").unwrap().remaining, 60);
}
