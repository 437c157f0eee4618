//! Redistribution engine.
//!
//! Takes the failure list of an attempt and decides, per city, whether
//! another provider should try it (and which one) or whether the city is a
//! permanent failure that leaves the work list. Every failure kind is
//! retryable through a different provider; a rate-limited provider in
//! particular just means someone else gets the city.

use tracing::{debug, info, instrument, warn};

use crate::dispatcher::CallResult;
use crate::ledger::model::LedgerSnapshot;
use crate::session::model::CityWork;

#[derive(Clone, Debug, Default)]
pub struct RedistributionOutcome {
    /// `(city, provider)` pins for the next attempt.
    pub reassigned: Vec<(String, String)>,
    /// Cities dropped from the work list for good.
    pub permanent: Vec<String>,
}

/// Resolves an attempt's failures against the current work list.
///
/// For each failed city the still-available provider with the most
/// remaining credits (ties by name) that is not in the city's tried-set
/// gets pinned for the next attempt. Cities with nobody left to ask, and
/// cities a single provider failed twice, are removed as permanent
/// failures.
#[instrument(skip_all, target = "redistribute", fields(failures = failures.len()))]
pub fn resolve(
    failures: &[CallResult],
    work: &mut Vec<CityWork>,
    snapshot: &LedgerSnapshot,
) -> RedistributionOutcome {
    let mut out = RedistributionOutcome::default();

    // Most credits first, names break ties; same order the planner uses.
    let mut candidates: Vec<_> = snapshot.available.iter().collect();
    candidates.sort_by(|a, b| b.remaining.cmp(&a.remaining).then(a.name.cmp(&b.name)));

    for failure in failures {
        let Some(city) = work.iter_mut().find(|c| c.name == failure.city) else {
            // Already resolved (or never ours); nothing to do.
            continue;
        };

        let count = city.record_failure(&failure.provider);
        if count >= 2 {
            // The tried-set should make this unreachable; treat a repeat
            // offender as proof the city is not servable.
            warn!(
                city = %city.name,
                provider = %failure.provider,
                "same provider failed this city twice; dropping city"
            );
            out.permanent.push(city.name.clone());
            continue;
        }

        match candidates.iter().find(|p| city.eligible(&p.name)) {
            Some(next) => {
                debug!(
                    city = %city.name,
                    from = %failure.provider,
                    to = %next.name,
                    outcome = ?failure.outcome,
                    "city reassigned"
                );
                city.pinned = Some(next.name.clone());
                out.reassigned.push((city.name.clone(), next.name.clone()));
            }
            None => {
                info!(city = %city.name, "no eligible provider left; dropping city");
                out.permanent.push(city.name.clone());
            }
        }
    }

    if !out.permanent.is_empty() {
        work.retain(|c| !out.permanent.contains(&c.name));
    }

    out
}
