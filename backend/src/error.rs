use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScrapeError {
    /// The request asks for more leads than every provider together can
    /// still supply. Raised before any provider call is made.
    #[error("requested {requested} leads but remaining free-tier capacity is {capacity} ({caps})")]
    QuotaExceeded {
        requested: u64,
        capacity: u64,
        /// Per-provider "name used/total" breakdown for the user message.
        caps: String,
    },

    #[error("progress sink failure: {0}")]
    ProgressSink(String),

    #[error("artifact store failure: {0}")]
    ArtifactStore(String),
}
