use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc::Sender;
use tracing::warn;

/// Envelope pushed to the realtime channel on every observable transition.
#[derive(Clone, Debug, PartialEq)]
pub struct ScraperEvent {
    pub correlation_id: String,
    pub channel_id: String,
    pub payload: EventPayload,
}

#[derive(Clone, Debug, PartialEq)]
pub enum EventPayload {
    Update {
        leads_count: u64,
        message: String,
    },
    Completed {
        downloadable_link: String,
        completed_in_s: u64,
        leads_count: u64,
        message: String,
    },
    Error {
        error: String,
    },
}

impl EventPayload {
    pub fn name(&self) -> &'static str {
        match self {
            EventPayload::Update { .. } => "scraper:update",
            EventPayload::Completed { .. } => "scraper:completed",
            EventPayload::Error { .. } => "scraper:error",
        }
    }
}

/// Push side of the progress surface. Best-effort: a dead bus must never
/// fail a session, so implementations swallow delivery errors.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: ScraperEvent) -> Result<()>;
}

/// Bridges events onto an in-process channel; the binary drains it into
/// whatever push transport the host provides.
pub struct ChannelEventSink {
    tx: Sender<ScraperEvent>,
}

impl ChannelEventSink {
    pub fn new(tx: Sender<ScraperEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn publish(&self, event: ScraperEvent) -> Result<()> {
        if self.tx.send(event).await.is_err() {
            warn!("event channel closed; dropping scraper event");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn mk_event(payload: EventPayload) -> ScraperEvent {
        ScraperEvent {
            correlation_id: "corr-1".into(),
            channel_id: "chan-1".into(),
            payload,
        }
    }

    #[test]
    fn event_names_match_wire_contract() {
        assert_eq!(
            mk_event(EventPayload::Update {
                leads_count: 1,
                message: "m".into()
            })
            .payload
            .name(),
            "scraper:update"
        );
        assert_eq!(
            mk_event(EventPayload::Error { error: "e".into() }).payload.name(),
            "scraper:error"
        );
    }

    #[tokio::test]
    async fn publish_delivers_to_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = ChannelEventSink::new(tx);

        let event = mk_event(EventPayload::Update {
            leads_count: 7,
            message: "found 7".into(),
        });
        sink.publish(event.clone()).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn publish_on_closed_channel_is_not_an_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let sink = ChannelEventSink::new(tx);
        let out = sink
            .publish(mk_event(EventPayload::Error { error: "x".into() }))
            .await;

        assert!(out.is_ok(), "event bus loss must not fail the session");
    }
}
