//! Logging setup and the push-channel bridge
//!
//! Tracing events go two ways: the usual fmt layer on stderr, and a
//! broadcast channel the web layer replays to monitoring clients. The
//! bridge flattens each event into a [`LogMessage`] by taking its message
//! and appending the remaining fields as `key=value` pairs.

use crate::models::LogMessage;
use chrono::Utc;
use std::fmt::Write as _;
use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Bounded backlog for push-channel subscribers; slow clients skip ahead.
const EVENT_CHANNEL_CAPACITY: usize = 256;

pub fn channel() -> broadcast::Sender<LogMessage> {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}

/// Install the global subscriber. `RUST_LOG` wins over the configured
/// level when set.
pub fn init(level: &str, events: broadcast::Sender<LogMessage>) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(BroadcastLayer::new(events))
        .init();
}

/// Mirrors every event that passes the filter into the broadcast channel.
pub struct BroadcastLayer {
    events: broadcast::Sender<LogMessage>,
}

impl BroadcastLayer {
    pub fn new(events: broadcast::Sender<LogMessage>) -> Self {
        Self { events }
    }
}

impl<S> Layer<S> for BroadcastLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if self.events.receiver_count() == 0 {
            return;
        }

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        let _ = self.events.send(LogMessage {
            timestamp: Utc::now(),
            level: event.metadata().level().to_string(),
            message: visitor.into_message(),
        });
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: String,
    fields: String,
}

impl RecordVisitor {
    fn into_message(self) -> String {
        let mut out = self.message;
        out.push_str(&self.fields);
        out
    }
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_owned();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
