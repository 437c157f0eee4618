use tracing::{Span, field};

/// Root span for one scrape request.
///
/// Every session, attempt, and sink write of a chain nests under this,
/// so a single correlation id pulls the whole request out of the logs.
/// The outcome fields are recorded once the chain settles.
pub fn request_span(correlation_id: &str) -> Span {
    tracing::info_span!(
        "scrape_request",
        correlation_id = %correlation_id,
        sessions = field::Empty,
        leads = field::Empty
    )
}

/// Records the chain's final shape on its root span.
pub fn record_outcome(span: &Span, sessions: u32, leads: u64) {
    span.record("sessions", sessions);
    span.record("leads", leads);
}
