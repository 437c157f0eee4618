pub mod schema;

use std::time::Duration;

use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use tracing::info;

/// Connection handle shared by the progress sink and the usage
/// repository.
///
/// Both sqlite (dev) and postgres (hosted) come through the Any driver,
/// so the binary picks the backend from the URL alone. The pool is small
/// on purpose: writers here are one progress row and one usage row per
/// attempt, not a query workload.
#[derive(Clone)]
pub struct Db {
    pub pool: AnyPool,
}

impl Db {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = AnyPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        info!(target: "db", "database pool ready");
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        schema::migrate(&self.pool).await
    }
}
