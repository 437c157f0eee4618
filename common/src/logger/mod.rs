mod init;
mod span;
mod trace_id;

pub use init::init_tracing;
pub use span::{record_outcome, request_span};
pub use trace_id::TraceId;

use std::future::Future;
use std::time::{Duration, Instant};

/// Runs `fut` and flags it in the log when it blows past `budget`.
///
/// Sink and artifact writes sit on the session's critical path; a slow
/// collaborator should be visible without failing anything.
pub async fn warn_over_budget<F, T>(op: &'static str, budget: Duration, fut: F) -> T
where
    F: Future<Output = T>,
{
    let started = Instant::now();
    let out = fut.await;

    let took = started.elapsed();
    if took > budget {
        tracing::warn!(
            target: "latency",
            op,
            took_ms = took.as_millis() as u64,
            budget_ms = budget.as_millis() as u64,
            "external call exceeded its latency budget"
        );
    }

    out
}
