//! Event sink trait and implementations.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, trace, Level};

/// Receiver of bundle lifecycle events.
///
/// Implementations must be cheap and must not panic. The coordinator calls
/// `try_emit` inline with the operation that produced the event.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event, waiting for the sink if it needs to.
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.try_emit(event_type, data);
    }

    /// Emits an event without blocking. Failures are swallowed.
    fn try_emit(&self, event_type: &str, data: Option<Value>);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn try_emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// Writes events to the `tracing` subscriber.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging at `level`.
    #[must_use]
    pub const fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level sink.
    #[must_use]
    pub const fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl EventSink for LoggingEventSink {
    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        let bundle_id = data
            .as_ref()
            .and_then(|d| d.get("bundle_id"))
            .and_then(Value::as_str)
            .unwrap_or("-");
        let data = data.as_ref().map(ToString::to_string).unwrap_or_default();

        if self.level == Level::TRACE {
            trace!(event_type, bundle_id, %data, "bundle event");
        } else if self.level == Level::DEBUG {
            debug!(event_type, bundle_id, %data, "bundle event");
        } else {
            info!(event_type, bundle_id, %data, "bundle event");
        }
    }
}

/// Keeps every event in memory, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<(String, Option<Value>)>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all events in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<Value>)> {
        self.events.lock().clone()
    }

    /// Returns the events whose type starts with `prefix`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<(String, Option<Value>)> {
        self.events
            .lock()
            .iter()
            .filter(|(t, _)| t.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Number of events of exactly `event_type`.
    #[must_use]
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(t, _)| t == event_type)
            .count()
    }

    /// Number of events collected.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Drops all collected events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for CollectingEventSink {
    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.events.lock().push((event_type.to_string(), data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_emit_delegates_to_try_emit() {
        let sink = CollectingEventSink::new();
        tokio_test::block_on(sink.emit("bundle.created", Some(json!({"bundle_id": "b1"}))));
        assert_eq!(sink.count("bundle.created"), 1);
    }

    #[test]
    fn test_logging_sink_accepts_any_payload() {
        let sink = LoggingEventSink::debug();
        sink.try_emit("bundle.deleted", Some(json!({"bundle_id": "b1"})));
        sink.try_emit("bundle.deleted", Some(json!([1, 2])));
        sink.try_emit("bundle.deleted", None);
        NoOpEventSink.try_emit("bundle.deleted", None);
    }

    #[test]
    fn test_logging_sink_at_every_level() {
        for level in [Level::TRACE, Level::DEBUG, Level::INFO, Level::WARN] {
            LoggingEventSink::new(level)
                .try_emit("bundle.created", Some(json!({"bundle_id": "b1", "nodes": 3})));
        }
    }

    #[test]
    fn test_collecting_sink_filters_by_prefix() {
        let sink = CollectingEventSink::new();
        sink.try_emit("bundle.created", None);
        sink.try_emit("bundle.node_transition", None);
        sink.try_emit("bundle.node_transition", None);
        sink.try_emit("other.event", None);

        assert_eq!(sink.len(), 4);
        assert_eq!(sink.events_of_type("bundle.").len(), 3);
        assert_eq!(sink.count("bundle.node_transition"), 2);

        sink.clear();
        assert!(sink.is_empty());
    }
}
