use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Durable home for the CSV artifact.
///
/// Stands in for the object store: `put` returns the link the core
/// publishes verbatim, `get` feeds carried leads into a retry pass or a
/// chained successor session.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, correlation_id: &str, bytes: &[u8]) -> Result<String>;

    async fn get(&self, correlation_id: &str) -> Result<Option<Vec<u8>>>;
}

/// Filesystem-backed store for development and tests.
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, correlation_id: &str) -> PathBuf {
        self.root.join(format!("{correlation_id}.csv"))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    #[instrument(skip(self, bytes), fields(size = bytes.len()), target = "artifact")]
    async fn put(&self, correlation_id: &str, bytes: &[u8]) -> Result<String> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .context("creating artifact directory")?;

        let path = self.path_for(correlation_id);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing artifact {}", path.display()))?;

        debug!(path = %path.display(), "artifact stored");
        Ok(format!("file://{}", path.display()))
    }

    async fn get(&self, correlation_id: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(correlation_id);

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading artifact {}", path.display())),
        }
    }
}
