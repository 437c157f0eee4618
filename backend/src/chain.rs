//! Chain orchestrator.
//!
//! A request that outgrows one session's budget continues in a successor
//! session: same correlation id (so progress rows, events, and the
//! artifact stay attached), incremented session index, the original
//! target, and the remaining city list minus permanent failures. The
//! successor reads carried leads back from the artifact, never from
//! process memory. Sessions run sequentially so rate limits and the
//! ledger are never contended by two sessions of the same chain.

use tracing::{info, instrument};

use crate::session::SessionController;
use crate::session::model::{SessionReport, SessionRequest, TerminalState};

pub struct ChainRunner {
    controller: SessionController,
}

impl ChainRunner {
    pub fn new(controller: SessionController) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    /// Drives a request chain to its terminal report.
    ///
    /// The controller never emits `ChainedOut` past the session cap, which
    /// bounds this loop.
    #[instrument(skip(self, req), target = "chain", fields(correlation_id = %req.correlation_id))]
    pub async fn run(&self, req: SessionRequest) -> anyhow::Result<SessionReport> {
        let mut req = req;

        loop {
            let report = self.controller.run_session(&req).await?;

            if report.state != TerminalState::ChainedOut {
                return Ok(report);
            }

            let next = successor_request(&req, &report);
            info!(
                session_index = next.session_index,
                carried = report.leads_count,
                cities = next.cities.len(),
                "spawning successor session"
            );
            req = next;
        }
    }
}

/// Builds the successor session's input from the chained-out report.
fn successor_request(prev: &SessionRequest, report: &SessionReport) -> SessionRequest {
    SessionRequest {
        keyword: prev.keyword.clone(),
        location: prev.location.clone(),
        // The successor treats the original target as its own; carried
        // leads come back through the artifact.
        limit: prev.limit,
        correlation_id: prev.correlation_id.clone(),
        channel_id: prev.channel_id.clone(),
        cities: report.cities_remaining.clone(),
        retry_count: 0,
        session_index: prev.session_index + 1,
        original_correlation_id: Some(
            prev.original_correlation_id
                .clone()
                .unwrap_or_else(|| prev.correlation_id.clone()),
        ),
        is_reverse: prev.is_reverse,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::StopReason;

    fn mk_report(cities_remaining: Vec<String>) -> SessionReport {
        SessionReport {
            state: TerminalState::ChainedOut,
            stop_reason: Some(StopReason::SessionLeadCap),
            leads_count: 346,
            new_leads: 346,
            artifact_url: Some("file:///tmp/x.csv".into()),
            message: "continuing".into(),
            completed_in_s: 700,
            cities_remaining,
            permanent_failures: vec!["Ghosttown".into()],
            retry_count: 1,
        }
    }

    #[test]
    fn successor_keeps_identity_and_advances_index() {
        let mut prev = SessionRequest::new(
            "dentist",
            "Brandenburg",
            500,
            "corr-9",
            "chan-1",
            vec!["Berlin".into(), "Erkner".into()],
        );
        prev.session_index = 2;
        prev.retry_count = 3;

        let report = mk_report(vec!["Erkner".into()]);
        let next = successor_request(&prev, &report);

        assert_eq!(next.correlation_id, "corr-9");
        assert_eq!(next.original_correlation_id.as_deref(), Some("corr-9"));
        assert_eq!(next.session_index, 3);
        assert_eq!(next.limit, 500, "successor keeps the original target");
        assert_eq!(next.retry_count, 0, "retry counter starts fresh");
        assert_eq!(next.cities, vec!["Erkner".to_string()]);
    }

    #[test]
    fn successor_preserves_the_original_correlation_root() {
        let mut prev = SessionRequest::new("a", "b", 10, "corr-child", "chan", vec![]);
        prev.original_correlation_id = Some("corr-root".into());

        let next = successor_request(&prev, &mk_report(vec![]));

        assert_eq!(next.original_correlation_id.as_deref(), Some("corr-root"));
    }
}
