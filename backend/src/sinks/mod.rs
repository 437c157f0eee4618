pub mod event;
pub mod progress;

pub use event::{ChannelEventSink, EventPayload, EventSink, ScraperEvent};
pub use progress::{ProgressSink, SqlxProgressSink};
