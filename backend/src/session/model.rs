use std::collections::{BTreeMap, BTreeSet};

/// Inbound payload for one work-session.
///
/// `cities` is empty on the very first session of a chain (an external
/// expansion step fills it before the first attempt); successors carry it
/// forward. `is_reverse` is an opaque hint for that expansion step and is
/// only forwarded.
#[derive(Clone, Debug)]
pub struct SessionRequest {
    pub keyword: String,
    pub location: String,
    pub limit: u32,
    pub correlation_id: String,
    pub channel_id: String,
    pub cities: Vec<String>,
    pub retry_count: u32,
    /// 1-based position of this session inside its chain.
    pub session_index: u32,
    pub original_correlation_id: Option<String>,
    pub is_reverse: bool,
}

impl SessionRequest {
    pub fn new(
        keyword: impl Into<String>,
        location: impl Into<String>,
        limit: u32,
        correlation_id: impl Into<String>,
        channel_id: impl Into<String>,
        cities: Vec<String>,
    ) -> Self {
        Self {
            keyword: keyword.into(),
            location: location.into(),
            limit,
            correlation_id: correlation_id.into(),
            channel_id: channel_id.into(),
            cities,
            retry_count: 0,
            session_index: 1,
            original_correlation_id: None,
            is_reverse: false,
        }
    }
}

/// Terminal states of one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminalState {
    /// Target met.
    Completed,
    /// Fewer leads than asked; what exists has been delivered.
    Partial,
    /// Infrastructure failure or refused request.
    Error,
    /// Budget ran out with work left; a successor session takes over.
    ChainedOut,
}

/// Why the attempt loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    TargetMet,
    /// Snapshot came back with no available provider.
    Exhausted,
    /// An attempt produced zero new leads.
    Stagnation,
    AttemptCap,
    /// Wall-clock guard tripped.
    TimeBudget,
    /// Per-session lead ceiling reached.
    SessionLeadCap,
    /// Nothing left to ask anyone about.
    NoEligibleWork,
}

/// One city's scheduling state inside a session.
///
/// `tried` only ever grows and never holds duplicates, which is what makes
/// redistribution terminate.
#[derive(Clone, Debug)]
pub struct CityWork {
    pub name: String,
    /// Providers that have already been asked about this city.
    pub tried: BTreeSet<String>,
    /// Provider the redistribution engine picked for the next attempt.
    pub pinned: Option<String>,
    /// Failure count per provider, for the repeated-failure guard.
    pub failures: BTreeMap<String, u32>,
}

impl CityWork {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tried: BTreeSet::new(),
            pinned: None,
            failures: BTreeMap::new(),
        }
    }

    pub fn eligible(&self, provider: &str) -> bool {
        !self.tried.contains(provider)
    }

    pub fn mark_tried(&mut self, provider: &str) {
        self.tried.insert(provider.to_string());
    }

    /// Records a failure and returns the new count for this provider.
    pub fn record_failure(&mut self, provider: &str) -> u32 {
        let count = self.failures.entry(provider.to_string()).or_insert(0);
        *count += 1;
        *count
    }
}

/// Outcome handed back to the chain driver and the caller.
#[derive(Clone, Debug)]
pub struct SessionReport {
    pub state: TerminalState,
    pub stop_reason: Option<StopReason>,

    /// Total unique rows in the artifact (carried + new).
    pub leads_count: u64,
    /// Unique rows produced by this session alone.
    pub new_leads: u64,

    pub artifact_url: Option<String>,
    pub message: String,
    pub completed_in_s: u64,

    /// Work left for a successor session.
    pub cities_remaining: Vec<String>,
    pub permanent_failures: Vec<String>,
    pub retry_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tried_set_grows_without_duplicates() {
        let mut city = CityWork::new("Berlin");

        assert!(city.eligible("a"));
        city.mark_tried("a");
        city.mark_tried("a");

        assert!(!city.eligible("a"));
        assert!(city.eligible("b"));
        assert_eq!(city.tried.len(), 1);
    }

    #[test]
    fn failure_counts_accumulate_per_provider() {
        let mut city = CityWork::new("Berlin");

        assert_eq!(city.record_failure("a"), 1);
        assert_eq!(city.record_failure("a"), 2);
        assert_eq!(city.record_failure("b"), 1);
    }
}
