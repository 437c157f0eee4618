/// When a provider's free tier refills.
///
/// The physical reset is done by the provider (or an external scheduler);
/// the ledger only decides whether a persisted `used` value still counts
/// against the current window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetPolicy {
    Monthly,
    Daily,
    /// One-off credit pools that never refill.
    Fixed,
}

impl ResetPolicy {
    pub fn period_ms(self) -> Option<u64> {
        match self {
            ResetPolicy::Monthly => Some(30 * 24 * 60 * 60 * 1000),
            ResetPolicy::Daily => Some(24 * 60 * 60 * 1000),
            ResetPolicy::Fixed => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResetPolicy::Monthly => "monthly",
            ResetPolicy::Daily => "daily",
            ResetPolicy::Fixed => "fixed",
        }
    }
}

/// Ledger-internal quota state for one provider.
#[derive(Clone, Debug)]
pub struct ProviderQuota {
    pub name: String,
    pub credits_total: u64,
    /// Credits consumed inside the current window.
    pub used: u64,
    /// Credits handed out by `reserve` and not yet committed or released.
    pub reserved: u64,
    pub reset_policy: ResetPolicy,
    /// Start of the current quota window.
    pub period_start_ms: u64,
}

impl ProviderQuota {
    pub fn new(name: impl Into<String>, credits_total: u64, reset_policy: ResetPolicy) -> Self {
        Self {
            name: name.into(),
            credits_total,
            used: 0,
            reserved: 0,
            reset_policy,
            period_start_ms: 0,
        }
    }

    /// `used` as seen through the reset window: a stale window counts as
    /// zero consumption even if the physical reset has not landed yet.
    pub fn effective_used(&self, now_ms: u64) -> u64 {
        match self.reset_policy.period_ms() {
            Some(period) if now_ms.saturating_sub(self.period_start_ms) >= period => 0,
            _ => self.used,
        }
    }

    pub fn remaining(&self, now_ms: u64) -> u64 {
        self.credits_total
            .saturating_sub(self.effective_used(now_ms))
            .saturating_sub(self.reserved)
    }

    pub fn is_available(&self, now_ms: u64) -> bool {
        self.remaining(now_ms) > 0
    }

    /// Folds an elapsed window into fresh state so subsequent writes are
    /// attributed to the current window.
    pub fn roll_if_elapsed(&mut self, now_ms: u64) {
        if let Some(period) = self.reset_policy.period_ms() {
            if now_ms.saturating_sub(self.period_start_ms) >= period {
                self.used = 0;
                self.period_start_ms = now_ms;
            }
        }
    }
}

/// Read-only view of one provider's credits at snapshot time.
#[derive(Clone, Debug)]
pub struct ProviderCredits {
    pub name: String,
    pub remaining: u64,
    pub total: u64,
    pub used: u64,
    pub reset_policy: ResetPolicy,
}

/// Availability partition taken at the top of every attempt.
#[derive(Clone, Debug, Default)]
pub struct LedgerSnapshot {
    /// Providers with credits left, name-sorted.
    pub available: Vec<ProviderCredits>,
    /// Providers with nothing left this window, name-sorted.
    pub exhausted: Vec<ProviderCredits>,
}

impl LedgerSnapshot {
    pub fn total_remaining(&self) -> u64 {
        self.available.iter().map(|p| p.remaining).sum()
    }

    pub fn get(&self, name: &str) -> Option<&ProviderCredits> {
        self.available
            .iter()
            .chain(self.exhausted.iter())
            .find(|p| p.name == name)
    }

    /// Per-provider "name used/total" breakdown for user-facing messages.
    pub fn describe(&self) -> String {
        let mut parts: Vec<String> = self
            .available
            .iter()
            .chain(self.exhausted.iter())
            .map(|p| format!("{} {}/{}", p.name, p.used, p.total))
            .collect();
        parts.sort();
        parts.join(", ")
    }
}
