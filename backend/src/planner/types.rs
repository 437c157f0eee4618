/// One provider's slice of an attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderAssignment {
    pub provider: String,
    pub cities: Vec<String>,
    pub leads_per_city: u32,
}

impl ProviderAssignment {
    /// Credits this slice will consume if every call returns full.
    pub fn requested(&self) -> u64 {
        self.cities.len() as u64 * self.leads_per_city as u64
    }
}

/// Output of one planning pass.
#[derive(Clone, Debug, Default)]
pub struct AttemptPlan {
    pub assignments: Vec<ProviderAssignment>,
    /// Cities with no eligible provider this attempt; they stay on the
    /// work list and are reconsidered next time.
    pub unassigned: Vec<String>,
}

impl AttemptPlan {
    pub fn requested_total(&self) -> u64 {
        self.assignments.iter().map(|a| a.requested()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}
