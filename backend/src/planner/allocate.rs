use std::collections::BTreeMap;

use tracing::{debug, instrument};

use crate::ledger::model::{LedgerSnapshot, ProviderCredits};
use crate::planner::types::{AttemptPlan, ProviderAssignment};
use crate::session::model::CityWork;

/// Spreads the remaining target across cities and available providers for
/// one attempt.
///
/// Constraints:
/// - a city goes to exactly one provider per attempt
/// - per provider, `cities * leads_per_city` never exceeds its credits
/// - the attempt as a whole never requests more than `remaining_target`
/// - a provider already in a city's tried-set is never asked again
///
/// Cities pinned by the redistribution engine are served first: each pin
/// gets a fair per-city share of the target, bounded by the pinned
/// provider's credits and the budget. The remaining cities are dealt over
/// provider order `(credits_remaining desc, name asc)`, engaging the
/// shortest prefix of that order whose combined credits cover what is
/// left of the target: a request two providers can satisfy should not fan
/// out to five and fragment every free tier a little. Within that prefix
/// the seed allocation is even (`floor(target / m)`), the residual is
/// dealt round-robin into leftover capacity, and cities are dealt
/// cyclically.
#[instrument(skip(work, snapshot), target = "planner", fields(cities = work.len()))]
pub fn plan_attempt(
    remaining_target: u64,
    work: &[CityWork],
    snapshot: &LedgerSnapshot,
) -> AttemptPlan {
    let carry_all = || AttemptPlan {
        assignments: vec![],
        unassigned: work.iter().map(|c| c.name.clone()).collect(),
    };

    if remaining_target == 0 || work.is_empty() {
        return carry_all();
    }

    if snapshot.available.is_empty() {
        return carry_all();
    }

    let mut unassigned: Vec<String> = Vec::new();
    let mut budget = remaining_target;

    // Fair per-city share used for pinned cities.
    let share = (remaining_target / work.len() as u64).max(1);

    // Pass 0: pinned cities go straight to their pinned provider.
    struct PinSlot {
        leads_per_city: u64,
        cities: Vec<String>,
    }

    let mut pins: BTreeMap<String, PinSlot> = BTreeMap::new();
    let mut rest: Vec<&CityWork> = Vec::new();

    for city in work {
        let Some(pin) = &city.pinned else {
            rest.push(city);
            continue;
        };

        let pinnable = snapshot
            .available
            .iter()
            .find(|p| &p.name == pin)
            .filter(|_| city.eligible(pin));

        let Some(provider) = pinnable else {
            rest.push(city);
            continue;
        };

        let slot = pins.entry(pin.clone()).or_insert_with(|| PinSlot {
            leads_per_city: share.min(provider.remaining).min(budget).max(1),
            cities: Vec::new(),
        });

        let claimed = slot.leads_per_city * slot.cities.len() as u64;
        if slot.leads_per_city <= budget && claimed + slot.leads_per_city <= provider.remaining {
            budget -= slot.leads_per_city;
            slot.cities.push(city.name.clone());
        } else {
            rest.push(city);
        }
    }

    let pins: BTreeMap<String, PinSlot> = pins
        .into_iter()
        .filter(|(_, s)| !s.cities.is_empty())
        .collect();

    // Providers serving pins sit this round out for everything else, so a
    // provider never appears twice in one plan.
    let mut providers: Vec<&ProviderCredits> = snapshot
        .available
        .iter()
        .filter(|p| p.remaining > 0 && !pins.contains_key(&p.name))
        .collect();

    providers.sort_by(|a, b| b.remaining.cmp(&a.remaining).then(a.name.cmp(&b.name)));

    let mut assignments: Vec<ProviderAssignment> = pins
        .into_iter()
        .map(|(provider, slot)| ProviderAssignment {
            provider,
            cities: slot.cities,
            leads_per_city: slot.leads_per_city as u32,
        })
        .collect();

    if rest.is_empty() || budget == 0 || providers.is_empty() {
        unassigned.extend(rest.iter().map(|c| c.name.clone()));
        return finish(assignments, unassigned);
    }

    // Shortest prefix whose credits cover the remaining budget (or
    // everyone, when even that is not enough).
    let mut cover = 0u64;
    let mut prefix = providers.len();
    for (i, p) in providers.iter().enumerate() {
        cover = cover.saturating_add(p.remaining);
        if cover >= budget {
            prefix = i + 1;
            break;
        }
    }
    let providers = &providers[..prefix];

    let m = providers.len() as u64;
    let n = rest.len() as u64;

    let base = budget / m;
    let cities_per_provider = n.div_ceil(m);
    let global_lpc = (base / cities_per_provider).max(1);

    // Pass 1: even seed, capped by each provider's credits.
    let mut alloc: Vec<u64> = providers.iter().map(|p| base.min(p.remaining)).collect();
    let mut residual = budget - alloc.iter().sum::<u64>();

    // Pass 2: deal the residual round-robin into leftover capacity.
    while residual > 0 {
        let mut progressed = false;
        for (i, p) in providers.iter().enumerate() {
            if residual == 0 {
                break;
            }
            if alloc[i] < p.remaining {
                alloc[i] += 1;
                residual -= 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    struct Slot {
        provider: String,
        leads_per_city: u64,
        capacity: usize,
        cities: Vec<String>,
    }

    let mut slots: Vec<Slot> = providers
        .iter()
        .zip(alloc.iter())
        .filter(|(_, a)| **a > 0)
        .map(|(p, a)| {
            let leads_per_city = global_lpc.min(*a);
            Slot {
                provider: p.name.clone(),
                leads_per_city,
                capacity: (*a / leads_per_city) as usize,
                cities: Vec::new(),
            }
        })
        .collect();

    if slots.is_empty() {
        unassigned.extend(rest.iter().map(|c| c.name.clone()));
        return finish(assignments, unassigned);
    }

    // Deal the remaining cities cyclically over the engaged providers.
    let mut cursor = 0usize;

    'cities: for city in rest {
        for k in 0..slots.len() {
            let idx = (cursor + k) % slots.len();
            let s = &mut slots[idx];
            if s.cities.len() < s.capacity && city.eligible(&s.provider) {
                s.cities.push(city.name.clone());
                cursor = (idx + 1) % slots.len();
                continue 'cities;
            }
        }

        unassigned.push(city.name.clone());
    }

    assignments.extend(
        slots
            .into_iter()
            .filter(|s| !s.cities.is_empty())
            .map(|s| ProviderAssignment {
                provider: s.provider,
                cities: s.cities,
                leads_per_city: s.leads_per_city as u32,
            }),
    );

    finish(assignments, unassigned)
}

fn finish(assignments: Vec<ProviderAssignment>, unassigned: Vec<String>) -> AttemptPlan {
    let plan = AttemptPlan {
        assignments,
        unassigned,
    };

    debug!(
        providers_engaged = plan.assignments.len(),
        requested = plan.requested_total(),
        carried = plan.unassigned.len(),
        "attempt plan derived"
    );

    plan
}
