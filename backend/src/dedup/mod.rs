//! Session-scoped deduplication and result accumulation.
//!
//! Rejection is by the canonical `company + address` composite key alone.
//! Secondary sets (normalised emails, digits-only phones) are maintained
//! for downstream analytics but never decide acceptance. Writers are
//! serialised because the dispatcher feeds results from many concurrent
//! provider calls; insertion is compare-and-insert so only the first
//! occurrence of a key survives.

pub mod csv;

use std::collections::HashSet;

use parking_lot::Mutex;
use providers::Lead;
use providers::lead::{normalize_phone, normalize_text};
use tracing::debug;

pub struct Deduplicator {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    seen: HashSet<String>,
    emails: HashSet<String>,
    phones: HashSet<String>,
    /// Accepted leads in insertion order; this is the CSV row order.
    rows: Vec<Lead>,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Deduplicator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Pre-populates state from carried leads (retry snapshots, chain
    /// predecessors) before any new lead is accepted. Carried rows count
    /// toward the total.
    pub fn seed(&self, leads: Vec<Lead>) -> usize {
        self.accept(leads)
    }

    /// Filters a batch through the seen-set; returns how many were new.
    pub fn accept(&self, leads: Vec<Lead>) -> usize {
        let mut inner = self.inner.lock();
        let mut accepted = 0;

        for lead in leads {
            if !lead.is_valid() {
                continue;
            }

            if !inner.seen.insert(lead.canonical_key()) {
                continue;
            }

            let email = normalize_text(&lead.email);
            if !email.is_empty() {
                inner.emails.insert(email);
            }
            let phone = normalize_phone(&lead.phone);
            if !phone.is_empty() {
                inner.phones.insert(phone);
            }

            inner.rows.push(lead);
            accepted += 1;
        }

        if accepted > 0 {
            debug!(accepted, total = inner.rows.len(), "leads accepted");
        }

        accepted
    }

    pub fn len(&self) -> usize {
        self.inner.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Accepted leads in insertion order.
    pub fn rows(&self) -> Vec<Lead> {
        self.inner.lock().rows.clone()
    }

    /// `(unique emails, unique phones)` across accepted leads.
    pub fn secondary_counts(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.emails.len(), inner.phones.len())
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]
        #[test]
        fn accepted_keys_are_pairwise_distinct(
            companies in prop::collection::vec("[a-c ]{0,6}", 0..40),
            addresses in prop::collection::vec("[0-3 ]{0,4}", 0..40),
        ) {
            let dedup = Deduplicator::new();

            let leads: Vec<Lead> = companies.iter().zip(addresses.iter().cycle())
                .map(|(c, a)| Lead {
                    company: c.clone(),
                    address: a.clone(),
                    phone: String::new(),
                    email: String::new(),
                    website: String::new(),
                })
                .collect();

            dedup.accept(leads);

            let rows = dedup.rows();
            let mut keys = std::collections::HashSet::new();
            for lead in &rows {
                prop_assert!(lead.is_valid());
                prop_assert!(keys.insert(lead.canonical_key()),
                    "duplicate canonical key survived: {:?}", lead);
            }
        }
    }
}
