use std::sync::Arc;
use std::sync::atomic::AtomicU64;

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    pub attempts: Arc<AtomicU64>,
    pub calls_ok: Arc<AtomicU64>,
    pub calls_failed: Arc<AtomicU64>,
    pub calls_timeout: Arc<AtomicU64>,
    pub calls_skipped: Arc<AtomicU64>,

    pub leads_accepted: Arc<AtomicU64>,
    pub leads_rejected: Arc<AtomicU64>,

    pub cities_redistributed: Arc<AtomicU64>,
    pub cities_permanent_failed: Arc<AtomicU64>,

    pub sessions_retried: Arc<AtomicU64>,
    pub sessions_chained: Arc<AtomicU64>,
}
