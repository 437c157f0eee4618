//! Session controller.
//!
//! Drives one bounded work-session end to end:
//!   1. Pre-flight: refuse targets beyond the combined free tier.
//!   2. Seed the deduplicator from the carried artifact, if any.
//!   3. Attempt loop: snapshot -> plan -> dispatch -> accept -> settle
//!      credits -> redistribute failures, until the target is met or a
//!      stopping condition fires.
//!   4. Post-loop: finish, re-enter for another pass, or hand off to a
//!      successor session.
//!
//! Non-responsibilities:
//! - Calling providers (dispatcher) or picking them (planner/redistribute).
//! - Running successor sessions (chain driver).
//!
//! Safety/liveness:
//! - Work per session is bounded by `max_attempts`, `max_retries`, the
//!   wall-clock budget, and the per-session lead cap.
//! - The progress ticker is abort-on-drop, so every exit path cancels it.
//! - Credits are settled reserve-then-commit; a cancelled attempt can
//!   never consume more than it reserved.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::artifact::ArtifactStore;
use crate::config::AppConfig;
use crate::dedup::Deduplicator;
use crate::dedup::csv::{read_csv, write_csv};
use crate::dispatcher::{self, Outcome, ProviderSet, used_by_provider};
use crate::error::ScrapeError;
use crate::ledger::QuotaLedger;
use crate::metrics::counters::Counters;
use crate::planner::types::AttemptPlan;
use crate::planner::plan_attempt;
use crate::redistribute;
use crate::session::model::{CityWork, SessionReport, SessionRequest, StopReason, TerminalState};
use crate::session::progress::ProgressTicker;
use crate::sinks::{EventPayload, EventSink, ProgressSink, ScraperEvent};
use crate::time::now_ms;

pub struct SessionController {
    cfg: AppConfig,
    ledger: Arc<QuotaLedger>,
    providers: ProviderSet,
    progress: Arc<dyn ProgressSink>,
    events: Arc<dyn EventSink>,
    artifacts: Arc<dyn ArtifactStore>,
    counters: Counters,
}

impl SessionController {
    pub fn new(
        cfg: AppConfig,
        ledger: Arc<QuotaLedger>,
        providers: ProviderSet,
        progress: Arc<dyn ProgressSink>,
        events: Arc<dyn EventSink>,
        artifacts: Arc<dyn ArtifactStore>,
        counters: Counters,
    ) -> Self {
        Self {
            cfg,
            ledger,
            providers,
            progress,
            events,
            artifacts,
            counters,
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Runs one session to a terminal state.
    ///
    /// Provider-level failures never surface here; only infrastructure
    /// faults (progress row writes, artifact writes) turn the session
    /// into a terminal `Error`.
    #[instrument(
        skip(self, req),
        target = "session",
        fields(
            correlation_id = %req.correlation_id,
            session_index = req.session_index,
            limit = req.limit
        )
    )]
    pub async fn run_session(&self, req: &SessionRequest) -> anyhow::Result<SessionReport> {
        let started = Instant::now();
        let target = req.limit as u64;

        if req.session_index <= 1 && req.retry_count == 0 {
            if let Err(e) = self
                .progress
                .begin(&req.correlation_id, &req.keyword, &req.location, target)
                .await
            {
                return Ok(self
                    .fail(req, ScrapeError::ProgressSink(e.to_string()).to_string(), started, 0)
                    .await);
            }

            // Free-tier pre-flight: refuse before any provider call.
            let snapshot = self.ledger.snapshot(now_ms());
            let capacity = snapshot.total_remaining();
            if target > capacity {
                let err = ScrapeError::QuotaExceeded {
                    requested: target,
                    capacity,
                    caps: snapshot.describe(),
                };
                info!(requested = target, capacity, "request refused by free-tier check");
                return Ok(self.fail(req, err.to_string(), started, 0).await);
            }
        }

        // Carried leads (retry snapshots, chain predecessors) come through
        // the artifact store, never process memory.
        let dedup = Deduplicator::new();
        match self.artifacts.get(&req.correlation_id).await {
            Ok(Some(bytes)) => match read_csv(&bytes) {
                Ok(carried) => {
                    let n = dedup.seed(carried);
                    debug!(carried = n, "carried leads loaded from artifact");
                }
                Err(e) => {
                    return Ok(self
                        .fail(req, ScrapeError::ArtifactStore(e.to_string()).to_string(), started, 0)
                        .await);
                }
            },
            Ok(None) => {}
            Err(e) => {
                return Ok(self
                    .fail(req, ScrapeError::ArtifactStore(e.to_string()).to_string(), started, 0)
                    .await);
            }
        }

        let gauge = Arc::new(AtomicU64::new(dedup.len() as u64));
        let ticker = ProgressTicker::spawn(
            self.progress.clone(),
            self.events.clone(),
            req.correlation_id.clone(),
            req.channel_id.clone(),
            gauge.clone(),
            started,
            Duration::from_millis(self.cfg.progress_interval_ms),
        );

        let session_cap = self.cfg.session_lead_cap() as u64;
        let mut work: Vec<CityWork> =
            req.cities.iter().map(|c| CityWork::new(c.clone())).collect();
        let mut permanent: Vec<String> = Vec::new();
        let mut retry_count = req.retry_count;
        let mut session_new: u64 = 0;

        let final_stop = loop {
            let pass_entry = dedup.len() as u64;

            let (stop, pass_new) = self
                .attempt_loop(
                    req,
                    target,
                    session_cap,
                    &dedup,
                    &gauge,
                    started,
                    &mut work,
                    &mut permanent,
                    &mut session_new,
                )
                .await;

            let accumulated = dedup.len() as u64;
            if accumulated >= target {
                break stop;
            }

            let out_of_budget =
                matches!(stop, StopReason::TimeBudget | StopReason::SessionLeadCap);

            // Yield ratio at pass entry: a pass that started below the
            // threshold may trigger one more even if it crossed it.
            let entry_ratio = pass_entry as f64 / target as f64;

            if !out_of_budget
                && entry_ratio < self.cfg.retry_ratio
                && retry_count < self.cfg.max_retries
                && pass_new > 0
            {
                // Snapshot first so a chained successor can resume from
                // whatever this pass already collected.
                if let Err(e) = self.persist_snapshot(&req.correlation_id, &dedup).await {
                    ticker.stop();
                    return Ok(self
                        .fail(
                            req,
                            ScrapeError::ArtifactStore(e.to_string()).to_string(),
                            started,
                            accumulated,
                        )
                        .await);
                }

                retry_count += 1;
                self.counters.sessions_retried.fetch_add(1, Ordering::Relaxed);
                info!(retry_count, accumulated, "re-entering session for another pass");

                // Fresh pass over everything still worth asking about.
                work = req
                    .cities
                    .iter()
                    .filter(|c| !permanent.contains(*c))
                    .map(|c| CityWork::new(c.clone()))
                    .collect();
                continue;
            }

            break stop;
        };

        ticker.stop();

        self.finalize(
            req,
            &dedup,
            final_stop,
            session_new,
            retry_count,
            permanent,
            work,
            started,
            target,
        )
        .await
    }

    /// One pass of the attempt loop. Returns the stop reason and how many
    /// new leads the pass produced.
    #[allow(clippy::too_many_arguments)]
    async fn attempt_loop(
        &self,
        req: &SessionRequest,
        target: u64,
        session_cap: u64,
        dedup: &Deduplicator,
        gauge: &Arc<AtomicU64>,
        started: Instant,
        work: &mut Vec<CityWork>,
        permanent: &mut Vec<String>,
        session_new: &mut u64,
    ) -> (StopReason, u64) {
        let budget = Duration::from_millis(
            self.cfg
                .max_runtime_ms
                .saturating_sub(self.cfg.runtime_guard_ms),
        );
        let per_city_timeout = Duration::from_millis(self.cfg.per_city_timeout_ms);

        let mut attempts = 0u32;
        let mut pass_new = 0u64;

        loop {
            let accumulated = dedup.len() as u64;
            if accumulated >= target {
                return (StopReason::TargetMet, pass_new);
            }
            if attempts >= self.cfg.max_attempts {
                return (StopReason::AttemptCap, pass_new);
            }
            if *session_new >= session_cap {
                return (StopReason::SessionLeadCap, pass_new);
            }
            if started.elapsed() >= budget {
                return (StopReason::TimeBudget, pass_new);
            }
            if work.is_empty() {
                return (StopReason::NoEligibleWork, pass_new);
            }

            let snapshot = self.ledger.snapshot(now_ms());
            if snapshot.available.is_empty() {
                return (StopReason::Exhausted, pass_new);
            }

            let remaining = (target - accumulated).min(session_cap - *session_new);
            let plan = plan_attempt(remaining, work, &snapshot);
            if plan.is_empty() {
                debug!("no assignable work this attempt");
                return (StopReason::NoEligibleWork, pass_new);
            }

            // Reserve credits; shrink any slice the ledger cannot back in
            // full (another session may have spent the snapshot's view).
            let mut assignments = Vec::new();
            let mut reservations: Vec<(String, u64)> = Vec::new();
            let mut releases: Vec<(String, u64)> = Vec::new();

            for mut a in plan.assignments {
                let granted = self.ledger.reserve(&a.provider, a.requested(), now_ms());
                while a.requested() > granted {
                    if a.cities.pop().is_none() {
                        break;
                    }
                }
                if a.cities.is_empty() {
                    releases.push((a.provider.clone(), granted));
                } else {
                    reservations.push((a.provider.clone(), granted));
                    assignments.push(a);
                }
            }

            for (provider, granted) in releases {
                if granted > 0 {
                    if let Err(e) = self.ledger.commit(&provider, granted, 0).await {
                        warn!(error = ?e, provider = %provider, "usage persistence failed");
                    }
                }
            }

            if assignments.is_empty() {
                return (StopReason::Exhausted, pass_new);
            }

            let plan = AttemptPlan {
                assignments,
                unassigned: plan.unassigned,
            };

            attempts += 1;
            self.counters.attempts.fetch_add(1, Ordering::Relaxed);
            debug!(
                attempt = attempts,
                requested = plan.requested_total(),
                "dispatching attempt"
            );

            let results =
                dispatcher::run_attempt(&self.providers, &plan, &req.keyword, per_city_timeout)
                    .await;

            // Tried-set bookkeeping: every call that actually ran counts,
            // skipped cities stay eligible.
            for r in &results {
                if r.outcome == Outcome::Skipped {
                    continue;
                }
                if let Some(c) = work.iter_mut().find(|c| c.name == r.city) {
                    c.mark_tried(&r.provider);
                    if c.pinned.as_deref() == Some(r.provider.as_str()) {
                        c.pinned = None;
                    }
                }
            }

            // Settle credits: charge delivered leads, release the rest.
            let used = used_by_provider(&results);
            for (provider, reserved) in reservations {
                let consumed = used.get(&provider).copied().unwrap_or(0);
                if let Err(e) = self.ledger.commit(&provider, reserved, consumed).await {
                    warn!(error = ?e, provider = %provider, "usage persistence failed");
                }
            }

            for r in &results {
                let counter = match r.outcome {
                    Outcome::Ok => &self.counters.calls_ok,
                    Outcome::Timeout => &self.counters.calls_timeout,
                    Outcome::Skipped => &self.counters.calls_skipped,
                    _ => &self.counters.calls_failed,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }

            // Accept in arrival order; dedup serialises the writers.
            let mut new_this_attempt = 0u64;
            let mut ok_cities: Vec<String> = Vec::new();
            let mut failures = Vec::new();

            for r in results {
                if r.outcome == Outcome::Ok {
                    ok_cities.push(r.city.clone());
                    new_this_attempt += dedup.accept(r.leads) as u64;
                } else if r.outcome.is_failure() {
                    failures.push(r);
                }
            }

            pass_new += new_this_attempt;
            *session_new += new_this_attempt;
            gauge.store(dedup.len() as u64, Ordering::Release);
            self.counters
                .leads_accepted
                .fetch_add(new_this_attempt, Ordering::Relaxed);

            // Served cities leave the work list.
            work.retain(|c| !ok_cities.contains(&c.name));

            let resolved =
                redistribute::resolve(&failures, work, &self.ledger.snapshot(now_ms()));
            self.counters
                .cities_redistributed
                .fetch_add(resolved.reassigned.len() as u64, Ordering::Relaxed);
            self.counters
                .cities_permanent_failed
                .fetch_add(resolved.permanent.len() as u64, Ordering::Relaxed);
            permanent.extend(resolved.permanent);

            if new_this_attempt == 0 {
                debug!("attempt produced no new leads; stopping pass");
                return (StopReason::Stagnation, pass_new);
            }
        }
    }

    /// Writes the artifact, emits the terminal (or boundary) signals, and
    /// builds the report.
    #[allow(clippy::too_many_arguments)]
    async fn finalize(
        &self,
        req: &SessionRequest,
        dedup: &Deduplicator,
        stop: StopReason,
        session_new: u64,
        retry_count: u32,
        permanent: Vec<String>,
        work: Vec<CityWork>,
        started: Instant,
        target: u64,
    ) -> anyhow::Result<SessionReport> {
        let accumulated = dedup.len() as u64;
        let completed_in_s = started.elapsed().as_secs();

        let bytes = match write_csv(&dedup.rows()) {
            Ok(b) => b,
            Err(e) => {
                return Ok(self
                    .fail(
                        req,
                        ScrapeError::ArtifactStore(e.to_string()).to_string(),
                        started,
                        accumulated,
                    )
                    .await);
            }
        };

        let url = match self.artifacts.put(&req.correlation_id, &bytes).await {
            Ok(u) => u,
            Err(e) => {
                return Ok(self
                    .fail(
                        req,
                        ScrapeError::ArtifactStore(e.to_string()).to_string(),
                        started,
                        accumulated,
                    )
                    .await);
            }
        };

        let cities_remaining: Vec<String> = work.iter().map(|c| c.name.clone()).collect();

        let chains = matches!(stop, StopReason::TimeBudget | StopReason::SessionLeadCap)
            && accumulated < target
            && session_new > 0
            && req.session_index + 1 <= self.cfg.max_sessions;

        let state = if accumulated >= target {
            TerminalState::Completed
        } else if chains {
            TerminalState::ChainedOut
        } else {
            TerminalState::Partial
        };

        let message = match state {
            TerminalState::Completed => {
                format!("Scraping completed: {accumulated} leads found")
            }
            TerminalState::ChainedOut => format!(
                "session {} complete with {accumulated} leads; continuing in a new session",
                req.session_index
            ),
            _ => {
                let snapshot = self.ledger.snapshot(now_ms());
                format!(
                    "Not enough leads in this location: {accumulated} of {target} found (credits: {})",
                    snapshot.describe()
                )
            }
        };

        match state {
            TerminalState::ChainedOut => {
                if let Err(e) = self
                    .progress
                    .update(&req.correlation_id, accumulated, &message)
                    .await
                {
                    return Ok(self
                        .fail(
                            req,
                            ScrapeError::ProgressSink(e.to_string()).to_string(),
                            started,
                            accumulated,
                        )
                        .await);
                }

                self.emit_event(
                    req,
                    EventPayload::Update {
                        leads_count: accumulated,
                        message: message.clone(),
                    },
                )
                .await;

                self.counters.sessions_chained.fetch_add(1, Ordering::Relaxed);
                info!(accumulated, "session chained out");
            }
            _ => {
                if let Err(e) = self
                    .progress
                    .completed(&req.correlation_id, &url, completed_in_s, accumulated, &message)
                    .await
                {
                    return Ok(self
                        .fail(
                            req,
                            ScrapeError::ProgressSink(e.to_string()).to_string(),
                            started,
                            accumulated,
                        )
                        .await);
                }

                self.emit_event(
                    req,
                    EventPayload::Completed {
                        downloadable_link: url.clone(),
                        completed_in_s,
                        leads_count: accumulated,
                        message: message.clone(),
                    },
                )
                .await;

                info!(
                    state = ?state,
                    accumulated,
                    stop = ?stop,
                    "session finished"
                );
            }
        }

        Ok(SessionReport {
            state,
            stop_reason: Some(stop),
            leads_count: accumulated,
            new_leads: session_new,
            artifact_url: Some(url),
            message,
            completed_in_s,
            cities_remaining,
            permanent_failures: permanent,
            retry_count,
        })
    }

    /// Persists a temporary CSV snapshot so a later pass or session can
    /// resume from it.
    async fn persist_snapshot(
        &self,
        correlation_id: &str,
        dedup: &Deduplicator,
    ) -> anyhow::Result<()> {
        let bytes = write_csv(&dedup.rows())?;
        self.artifacts.put(correlation_id, &bytes).await?;
        Ok(())
    }

    async fn emit_event(&self, req: &SessionRequest, payload: EventPayload) {
        let event = ScraperEvent {
            correlation_id: req.correlation_id.clone(),
            channel_id: req.channel_id.clone(),
            payload,
        };

        if let Err(e) = self.events.publish(event).await {
            warn!(error = ?e, "event publish failed");
        }
    }

    /// Terminal error path: record, notify, report. Never panics and never
    /// loses the human-readable cause.
    async fn fail(
        &self,
        req: &SessionRequest,
        message: String,
        started: Instant,
        leads_count: u64,
    ) -> SessionReport {
        warn!(message = %message, "session terminated with error");

        if let Err(e) = self.progress.error(&req.correlation_id, &message).await {
            warn!(error = ?e, "error row write failed");
        }

        self.emit_event(
            req,
            EventPayload::Error {
                error: message.clone(),
            },
        )
        .await;

        SessionReport {
            state: TerminalState::Error,
            stop_reason: None,
            leads_count,
            new_leads: 0,
            artifact_url: None,
            message,
            completed_in_s: started.elapsed().as_secs(),
            cities_remaining: Vec::new(),
            permanent_failures: Vec::new(),
            retry_count: req.retry_count,
        }
    }
}
