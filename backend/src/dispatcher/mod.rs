//! Parallel attempt dispatcher.
//!
//! Responsibilities:
//! - Run every (provider, city) pair of an attempt plan concurrently.
//! - Enforce the per-city deadline; expiry cancels only that call.
//! - Classify every failure into the shared taxonomy and return it;
//!   nothing a provider does is ever thrown out of this module.
//! - Stop a provider's slice early once it has collected its allocation;
//!   cities skipped that way are not failures and return to the work list.
//!
//! Non-responsibilities:
//! - Deciding what to do with failures (redistribution engine).
//! - Accepting leads (deduplicator) or charging credits (ledger).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use providers::{ErrorKind, Lead, Provider, ProviderError};
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout};
use tracing::{debug, instrument, warn};

use crate::planner::types::AttemptPlan;

/// Caller-side classification of one provider/city call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    /// Provider answered with nothing for a city expected to have results.
    NotFound,
    RateLimited,
    Timeout,
    ApiError,
    Unknown,
    /// The provider's allocation filled before this city ran; not a
    /// failure, the city stays on the work list.
    Skipped,
}

impl Outcome {
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Outcome::NotFound
                | Outcome::RateLimited
                | Outcome::Timeout
                | Outcome::ApiError
                | Outcome::Unknown
        )
    }

    fn from_error_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NotFound => Outcome::NotFound,
            ErrorKind::RateLimited => Outcome::RateLimited,
            ErrorKind::Timeout => Outcome::Timeout,
            ErrorKind::ApiError => Outcome::ApiError,
            ErrorKind::Unknown => Outcome::Unknown,
        }
    }
}

/// Result of one provider/city call.
#[derive(Clone, Debug)]
pub struct CallResult {
    pub provider: String,
    pub city: String,
    pub leads: Vec<Lead>,
    pub outcome: Outcome,
    pub detail: Option<String>,
    /// Back-off suggested by a rate-limited provider.
    pub retry_after: Option<Duration>,
    pub duration_ms: u64,
}

impl CallResult {
    fn empty(provider: &str, city: &str, outcome: Outcome, detail: Option<String>) -> Self {
        Self {
            provider: provider.to_string(),
            city: city.to_string(),
            leads: Vec::new(),
            outcome,
            detail,
            retry_after: None,
            duration_ms: 0,
        }
    }
}

/// The live set of provider adapters, addressed by name.
#[derive(Clone)]
pub struct ProviderSet {
    inner: Vec<Arc<dyn Provider>>,
}

impl ProviderSet {
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self { inner: providers }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.inner.iter().find(|p| p.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Shared per-provider lead counter enforcing the early stop.
struct ProviderBudget {
    allocated: u64,
    collected: AtomicU64,
}

impl ProviderBudget {
    fn new(allocated: u64) -> Self {
        Self {
            allocated,
            collected: AtomicU64::new(0),
        }
    }

    fn exhausted(&self) -> bool {
        self.collected.load(Ordering::Acquire) >= self.allocated
    }

    /// Claims up to `want` units of the allocation; returns the claim.
    fn grab(&self, want: u64) -> u64 {
        let mut granted = 0;
        let _ = self
            .collected
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                granted = want.min(self.allocated.saturating_sub(cur));
                Some(cur + granted)
            });
        granted
    }
}

/// Runs one attempt: every (provider, city) pair concurrently, each under
/// its own `per_city_timeout`. Result order follows call completion and is
/// non-deterministic.
#[instrument(
    skip(providers, plan),
    target = "dispatcher",
    fields(pairs = plan.assignments.iter().map(|a| a.cities.len()).sum::<usize>())
)]
pub async fn run_attempt(
    providers: &ProviderSet,
    plan: &AttemptPlan,
    keyword: &str,
    per_city_timeout: Duration,
) -> Vec<CallResult> {
    let mut results = Vec::new();
    let mut tasks: JoinSet<CallResult> = JoinSet::new();

    for assignment in &plan.assignments {
        let Some(provider) = providers.get(&assignment.provider) else {
            warn!(provider = %assignment.provider, "assignment for unregistered provider");
            for city in &assignment.cities {
                results.push(CallResult::empty(
                    &assignment.provider,
                    city,
                    Outcome::Unknown,
                    Some("provider not registered".to_string()),
                ));
            }
            continue;
        };

        let budget = Arc::new(ProviderBudget::new(assignment.requested()));

        for city in &assignment.cities {
            let provider = provider.clone();
            let budget = budget.clone();
            let keyword = keyword.to_string();
            let city = city.clone();
            let leads_per_city = assignment.leads_per_city;

            tasks.spawn(async move {
                call_one(
                    provider,
                    budget,
                    &keyword,
                    &city,
                    leads_per_city,
                    per_city_timeout,
                )
                .await
            });
        }
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => warn!(error = ?e, "dispatcher task failed to join"),
        }
    }

    debug!(
        total = results.len(),
        failures = results.iter().filter(|r| r.outcome.is_failure()).count(),
        "attempt dispatched"
    );

    results
}

async fn call_one(
    provider: Arc<dyn Provider>,
    budget: Arc<ProviderBudget>,
    keyword: &str,
    city: &str,
    leads_per_city: u32,
    per_city_timeout: Duration,
) -> CallResult {
    let name = provider.name().to_string();

    if budget.exhausted() {
        return CallResult::empty(&name, city, Outcome::Skipped, None);
    }

    let started = Instant::now();
    let outcome = timeout(
        per_city_timeout,
        provider.search(keyword, city, leads_per_city),
    )
    .await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        // Deadline expired; the in-flight call was dropped with the timeout.
        Err(_) => CallResult {
            provider: name,
            city: city.to_string(),
            leads: Vec::new(),
            outcome: Outcome::Timeout,
            detail: Some(format!("exceeded {}ms deadline", per_city_timeout.as_millis())),
            retry_after: None,
            duration_ms,
        },

        Ok(Err(ProviderError {
            kind,
            detail,
            retry_after,
        })) => CallResult {
            provider: name,
            city: city.to_string(),
            leads: Vec::new(),
            outcome: Outcome::from_error_kind(kind),
            detail: Some(detail),
            retry_after,
            duration_ms,
        },

        Ok(Ok(leads)) if leads.is_empty() => CallResult {
            provider: name,
            city: city.to_string(),
            leads: Vec::new(),
            outcome: Outcome::NotFound,
            detail: None,
            retry_after: None,
            duration_ms,
        },

        Ok(Ok(mut leads)) => {
            let granted = budget.grab(leads.len() as u64) as usize;

            if granted == 0 {
                // Allocation filled while this call was in flight.
                return CallResult {
                    provider: name,
                    city: city.to_string(),
                    leads: Vec::new(),
                    outcome: Outcome::Skipped,
                    detail: None,
                    retry_after: None,
                    duration_ms,
                };
            }

            leads.truncate(granted);

            CallResult {
                provider: name,
                city: city.to_string(),
                leads,
                outcome: Outcome::Ok,
                detail: None,
                retry_after: None,
                duration_ms,
            }
        }
    }
}

/// Sums delivered leads per provider, which is what the ledger charges.
pub fn used_by_provider(results: &[CallResult]) -> HashMap<String, u64> {
    let mut m: HashMap<String, u64> = HashMap::new();
    for r in results {
        *m.entry(r.provider.clone()).or_insert(0) += r.leads.len() as u64;
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::types::ProviderAssignment;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Scripted provider: per-city canned responses with optional delay.
    struct FakeProvider {
        name: String,
        delay: Duration,
        responses: Mutex<HashMap<String, Result<Vec<Lead>, ProviderError>>>,
    }

    impl FakeProvider {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                delay: Duration::ZERO,
                responses: Mutex::new(HashMap::new()),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn script(self, city: &str, response: Result<Vec<Lead>, ProviderError>) -> Self {
            self.responses.lock().insert(city.to_string(), response);
            self
        }
    }

    #[async_trait]
    impl Provider for FakeProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn search(
            &self,
            _keyword: &str,
            city: &str,
            _limit: u32,
        ) -> Result<Vec<Lead>, ProviderError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.responses
                .lock()
                .get(city)
                .cloned()
                .unwrap_or_else(|| Ok(vec![]))
        }
    }

    fn mk_lead(i: usize, city: &str) -> Lead {
        Lead {
            company: format!("company-{i}-{city}"),
            address: format!("{i} main st, {city}"),
            phone: format!("4930{i}"),
            email: String::new(),
            website: String::new(),
        }
    }

    fn mk_leads(n: usize, city: &str) -> Vec<Lead> {
        (0..n).map(|i| mk_lead(i, city)).collect()
    }

    fn mk_plan(entries: &[(&str, &[&str], u32)]) -> AttemptPlan {
        AttemptPlan {
            assignments: entries
                .iter()
                .map(|(p, cities, lpc)| ProviderAssignment {
                    provider: p.to_string(),
                    cities: cities.iter().map(|c| c.to_string()).collect(),
                    leads_per_city: *lpc,
                })
                .collect(),
            unassigned: vec![],
        }
    }

    fn by_city<'a>(results: &'a [CallResult], city: &str) -> &'a CallResult {
        results.iter().find(|r| r.city == city).unwrap()
    }

    #[tokio::test]
    async fn classifies_success_empty_and_error() {
        let provider = Arc::new(
            FakeProvider::new("a")
                .script("ok-town", Ok(mk_leads(2, "ok-town")))
                .script("empty-town", Ok(vec![]))
                .script(
                    "broken-town",
                    Err(ProviderError::api(500, "internal error")),
                ),
        );

        let set = ProviderSet::new(vec![provider]);
        let plan = mk_plan(&[("a", &["ok-town", "empty-town", "broken-town"], 2)]);

        let results = run_attempt(&set, &plan, "bakery", Duration::from_secs(10)).await;

        assert_eq!(results.len(), 3);
        assert_eq!(by_city(&results, "ok-town").outcome, Outcome::Ok);
        assert_eq!(by_city(&results, "ok-town").leads.len(), 2);
        assert_eq!(by_city(&results, "empty-town").outcome, Outcome::NotFound);
        assert_eq!(by_city(&results, "broken-town").outcome, Outcome::ApiError);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_is_classified_as_timeout() {
        let provider = Arc::new(
            FakeProvider::new("a")
                .with_delay(Duration::from_secs(30))
                .script("slow-town", Ok(mk_leads(1, "slow-town"))),
        );

        let set = ProviderSet::new(vec![provider]);
        let plan = mk_plan(&[("a", &["slow-town"], 1)]);

        let results = run_attempt(&set, &plan, "bakery", Duration::from_secs(10)).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, Outcome::Timeout);
        assert!(results[0].leads.is_empty());
        assert!(results[0].duration_ms >= 10_000);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_only_the_slow_call() {
        let provider = Arc::new(
            FakeProvider::new("a")
                .script("fast-town", Ok(mk_leads(1, "fast-town")))
                .with_delay(Duration::ZERO),
        );
        let slow = Arc::new(
            FakeProvider::new("b")
                .with_delay(Duration::from_secs(60))
                .script("slow-town", Ok(mk_leads(1, "slow-town"))),
        );

        let set = ProviderSet::new(vec![provider, slow]);
        let plan = mk_plan(&[("a", &["fast-town"], 1), ("b", &["slow-town"], 1)]);

        let results = run_attempt(&set, &plan, "bakery", Duration::from_secs(10)).await;

        assert_eq!(by_city(&results, "fast-town").outcome, Outcome::Ok);
        assert_eq!(by_city(&results, "slow-town").outcome, Outcome::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn provider_slice_stops_early_once_allocation_is_met() {
        // fast-town fills the whole allocation (2) before late-town's
        // delayed response lands; late-town must come back Skipped, not
        // failed, with its leads dropped.
        let provider = Arc::new(
            FakeProvider::new("a")
                .script("fast-town", Ok(mk_leads(2, "fast-town")))
                .script("late-town", Ok(mk_leads(2, "late-town"))),
        );

        // Same provider, but the late city is scripted through a second
        // handle with a delay so completion order is deterministic.
        let late = Arc::new(
            FakeProvider::new("a")
                .with_delay(Duration::from_millis(50))
                .script("late-town", Ok(mk_leads(2, "late-town"))),
        );

        // Build the plan by hand so both cities share one budget: dispatch
        // against the fast handle, then verify the counter behavior
        // directly for the late case.
        let budget = Arc::new(ProviderBudget::new(2));

        let first = call_one(
            provider,
            budget.clone(),
            "bakery",
            "fast-town",
            2,
            Duration::from_secs(10),
        )
        .await;
        assert_eq!(first.outcome, Outcome::Ok);
        assert_eq!(first.leads.len(), 2);

        let second = call_one(
            late,
            budget,
            "bakery",
            "late-town",
            2,
            Duration::from_secs(10),
        )
        .await;
        assert_eq!(second.outcome, Outcome::Skipped);
        assert!(second.leads.is_empty());
    }

    #[tokio::test]
    async fn overdelivery_is_truncated_to_the_allocation() {
        let provider = Arc::new(
            FakeProvider::new("a").script("big-town", Ok(mk_leads(9, "big-town"))),
        );

        let set = ProviderSet::new(vec![provider]);
        let plan = mk_plan(&[("a", &["big-town"], 3)]);

        let results = run_attempt(&set, &plan, "bakery", Duration::from_secs(10)).await;

        assert_eq!(results[0].outcome, Outcome::Ok);
        assert_eq!(results[0].leads.len(), 3);
    }

    #[tokio::test]
    async fn unregistered_provider_yields_unknown_not_panic() {
        let set = ProviderSet::new(vec![]);
        let plan = mk_plan(&[("ghost", &["x"], 1)]);

        let results = run_attempt(&set, &plan, "bakery", Duration::from_secs(10)).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, Outcome::Unknown);
    }

    #[tokio::test]
    async fn rate_limit_backoff_hint_is_surfaced() {
        let provider = Arc::new(FakeProvider::new("a").script(
            "busy-town",
            Err(ProviderError::rate_limited(
                "429",
                Some(Duration::from_secs(17)),
            )),
        ));

        let set = ProviderSet::new(vec![provider]);
        let plan = mk_plan(&[("a", &["busy-town"], 1)]);

        let results = run_attempt(&set, &plan, "bakery", Duration::from_secs(10)).await;

        assert_eq!(results[0].outcome, Outcome::RateLimited);
        assert_eq!(results[0].retry_after, Some(Duration::from_secs(17)));
    }

    #[test]
    fn used_by_provider_sums_delivered_leads() {
        let results = vec![
            CallResult {
                provider: "a".into(),
                city: "x".into(),
                leads: mk_leads(3, "x"),
                outcome: Outcome::Ok,
                detail: None,
                retry_after: None,
                duration_ms: 5,
            },
            CallResult {
                provider: "a".into(),
                city: "y".into(),
                leads: mk_leads(2, "y"),
                outcome: Outcome::Ok,
                detail: None,
                retry_after: None,
                duration_ms: 5,
            },
            CallResult::empty("b", "z", Outcome::NotFound, None),
        ];

        let used = used_by_provider(&results);
        assert_eq!(used.get("a"), Some(&5));
        assert_eq!(used.get("b"), Some(&0));
    }
}
