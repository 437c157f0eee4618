#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string (progress rows + provider usage).
    pub database_url: String,

    /// Directory the local artifact store writes CSVs into.
    pub artifact_dir: String,

    // =========================
    // Dispatch configuration
    // =========================
    /// Deadline for a single provider/city call, in milliseconds.
    ///
    /// Expiry cancels only that call; the rest of the attempt keeps
    /// running. The city is re-queued for another provider.
    pub per_city_timeout_ms: u64,

    // =========================
    // Session configuration
    // =========================
    /// Wall-clock budget for one work-session, in milliseconds.
    ///
    /// Sized to leave safety margin under a 15-minute host runtime cap:
    /// the controller must commit results and decide retry/chain/finish
    /// before the host kills the process.
    pub max_runtime_ms: u64,

    /// Margin subtracted from `max_runtime_ms` when checking whether
    /// another attempt still fits. Covers finalisation (artifact write,
    /// sink updates).
    pub runtime_guard_ms: u64,

    /// Upper bound on attempt iterations inside one session pass.
    pub max_attempts: u32,

    /// Upper bound on in-session retries (full re-passes over the city
    /// list when the yield ratio is below `retry_ratio`).
    pub max_retries: u32,

    /// Yield ratio below which a retry pass is worth it.
    pub retry_ratio: f64,

    /// Upper bound on chained sessions for one request.
    ///
    /// This is cost policy, not correctness: raising it just lets a large
    /// request burn more provider credits across more host invocations.
    pub max_sessions: u32,

    /// Observed sustainable scrape rate, used to derive the per-session
    /// lead cap from the runtime budget.
    pub leads_per_minute: u32,

    /// Direct override for the per-session lead cap; when unset the cap is
    /// derived from `max_runtime_ms` and `leads_per_minute`.
    pub max_leads_per_session: Option<u32>,

    // =========================
    // Progress configuration
    // =========================
    /// Cadence of progress rows/events while a session is active, in
    /// milliseconds.
    pub progress_interval_ms: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://leadcast_dev.db".to_string());

        let artifact_dir =
            std::env::var("ARTIFACT_DIR").unwrap_or_else(|_| "./artifacts".to_string());

        Self {
            database_url,
            artifact_dir,

            per_city_timeout_ms: 10_000,

            // 13 minutes under a 15-minute host cap.
            max_runtime_ms: 13 * 60 * 1000,
            runtime_guard_ms: 30_000,

            max_attempts: 8,
            max_retries: 3,
            retry_ratio: 0.8,
            max_sessions: 4,

            leads_per_minute: 30,
            max_leads_per_session: None,

            progress_interval_ms: 10_000,
        }
    }

    /// Hard ceiling on leads a single session may produce.
    pub fn session_lead_cap(&self) -> u32 {
        self.max_leads_per_session.unwrap_or_else(|| {
            let minutes = self.max_runtime_ms as f64 / 60_000.0;
            (minutes * self.leads_per_minute as f64).floor() as u32
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_lead_cap_derives_from_runtime_budget() {
        let mut cfg = AppConfig::from_env();
        cfg.max_runtime_ms = 13 * 60 * 1000;
        cfg.leads_per_minute = 30;
        cfg.max_leads_per_session = None;

        assert_eq!(cfg.session_lead_cap(), 390);
    }

    #[test]
    fn session_lead_cap_override_wins() {
        let mut cfg = AppConfig::from_env();
        cfg.max_leads_per_session = Some(346);
        assert_eq!(cfg.session_lead_cap(), 346);
    }
}
