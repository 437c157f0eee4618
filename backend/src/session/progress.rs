use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use common::logger::warn_over_budget;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::warn;

use crate::sinks::{EventPayload, EventSink, ProgressSink, ScraperEvent};

/// Background task emitting a progress snapshot at a fixed cadence while a
/// session is active.
///
/// The task holds no session state beyond a shared lead counter, so the
/// controller can keep mutating freely. Cancellation is abort-on-drop,
/// which covers every session exit path including panics.
pub struct ProgressTicker {
    handle: JoinHandle<()>,
}

impl ProgressTicker {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        progress: Arc<dyn ProgressSink>,
        events: Arc<dyn EventSink>,
        correlation_id: String,
        channel_id: String,
        leads: Arc<AtomicU64>,
        started: Instant,
        interval: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; the session start
            // update is the controller's job.
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let count = leads.load(Ordering::Acquire);
                let elapsed_s = started.elapsed().as_secs();
                let message = format!("scraping in progress: {count} leads after {elapsed_s}s");

                let write = warn_over_budget("progress_update", Duration::from_millis(500), async {
                    progress.update(&correlation_id, count, &message).await
                })
                .await;

                if let Err(e) = write {
                    // Progress is observability; a failed row never stops
                    // the scrape itself.
                    warn!(error = ?e, "progress row update failed");
                }

                let event = ScraperEvent {
                    correlation_id: correlation_id.clone(),
                    channel_id: channel_id.clone(),
                    payload: EventPayload::Update {
                        leads_count: count,
                        message,
                    },
                };

                if let Err(e) = events.publish(event).await {
                    warn!(error = ?e, "progress event publish failed");
                }
            }
        });

        Self { handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
