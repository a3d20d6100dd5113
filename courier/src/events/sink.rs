//! Event sink trait and implementations.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, Level};

/// An event as recorded by [`CollectingEventSink`].
pub type RecordedEvent = (String, Option<Value>);

/// Receives pipeline lifecycle events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The dotted event name (e.g. "pipeline.exception")
    /// * `data` - Optional event payload
    async fn emit(&self, event_type: &str, data: Option<Value>);

    /// Emits an event without awaiting. Never fails.
    fn try_emit(&self, event_type: &str, data: Option<Value>);
}

/// Discards all events. The default sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// Writes events to the tracing subscriber.
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
    /// Creates a logging sink at the given level. Anything other than
    /// `DEBUG` logs at `INFO`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event_type: &str, data: Option<&Value>) {
        if self.level == Level::DEBUG {
            debug!(event_type, event_data = ?data, "Bus event");
        } else {
            info!(event_type, event_data = ?data, "Bus event");
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.log_event(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.log_event(event_type, data.as_ref());
    }
}

/// Keeps every event in memory, for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<RecordedEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.read().clone()
    }

    /// Returns the collected event names in emission order.
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        self.events.read().iter().map(|(name, _)| name.clone()).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events whose name starts with `prefix`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<RecordedEvent> {
        self.events
            .read()
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.events.write().push((event_type.to_string(), data));
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_and_logging_sinks_accept_events() {
        NoOpEventSink.emit("pipeline.started", None).await;
        LoggingEventSink::debug().try_emit("pipeline.completed", Some(json!({ "pipeline": "inbox" })));
        LoggingEventSink::default()
            .emit("pipeline.aborted", Some(json!({ "pipeline": "inbox" })))
            .await;
    }

    #[tokio::test]
    async fn test_collecting_sink_keeps_order() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit("pipeline.started", None).await;
        sink.try_emit("pipeline.exception", Some(json!({ "stage": "dispatch" })));

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.event_names(), vec!["pipeline.started", "pipeline.exception"]);
        assert_eq!(sink.events()[1].1, Some(json!({ "stage": "dispatch" })));
    }

    #[tokio::test]
    async fn test_collecting_sink_filter_and_clear() {
        let sink = CollectingEventSink::new();
        sink.emit("pipeline.exception", None).await;
        sink.emit("pipeline.exception.handled", None).await;
        sink.emit("pipeline.completed", None).await;

        assert_eq!(sink.events_of_type("pipeline.exception").len(), 2);

        sink.clear();
        assert!(sink.is_empty());
    }
}
