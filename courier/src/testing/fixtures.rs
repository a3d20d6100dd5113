//! Queue and message fixtures for pipeline tests.

use std::sync::Arc;

use crate::events::CollectingEventSink;
use crate::handlers::{HandlerFactory, HandlerRegistration, HandlerRegistry, MessageHandler};
use crate::message::TransportMessage;
use crate::pipeline::{PipelineServices, PipelineState, QueueSet};
use crate::policy::{DefaultFailurePolicy, IgnoreSchedule};
use crate::queue::{MemoryQueue, Queue};
use crate::serialization::{JsonSerializer, Serializer};
use crate::utils::ManualClock;

/// In-memory queues, a manual clock and an event collector wired together.
#[derive(Debug)]
pub struct TestBus {
    /// The work queue.
    pub work: Arc<MemoryQueue>,
    /// The error queue.
    pub error: Arc<MemoryQueue>,
    /// The deferred queue.
    pub deferred: Arc<MemoryQueue>,
    /// The clock every component reads.
    pub clock: Arc<ManualClock>,
    /// Collects pipeline events.
    pub events: Arc<CollectingEventSink>,
    /// The handler factory.
    pub factory: Arc<HandlerFactory>,
    /// Retry threshold used by the failure policy.
    pub maximum_failure_count: usize,
    serializer: JsonSerializer,
}

impl TestBus {
    /// Creates a fixture with a retry threshold of 3 and no ignore window.
    #[must_use]
    pub fn new() -> Self {
        Self {
            work: Arc::new(MemoryQueue::new("memory://work")),
            error: Arc::new(MemoryQueue::new("memory://error")),
            deferred: Arc::new(MemoryQueue::new("memory://deferred")),
            clock: Arc::new(ManualClock::starting_now()),
            events: Arc::new(CollectingEventSink::new()),
            factory: Arc::new(HandlerFactory::with_registry(HandlerRegistry::new())),
            maximum_failure_count: 3,
            serializer: JsonSerializer::new(),
        }
    }

    /// Registers a shared handler instance for its message type.
    ///
    /// # Panics
    ///
    /// Panics if the message type is already registered.
    #[allow(clippy::expect_used)]
    pub fn register<H>(&self, message_type: &str, handler: Arc<H>)
    where
        H: MessageHandler + 'static,
    {
        let registration = HandlerRegistration::new(message_type, move || {
            Arc::clone(&handler) as Arc<dyn MessageHandler>
        });
        self.factory
            .register_handlers(&vec![registration])
            .expect("handler registration");
    }

    /// Queues with a deferred queue.
    #[must_use]
    pub fn queues(&self) -> QueueSet {
        QueueSet::new(self.work.clone(), self.error.clone()).with_deferred(self.deferred.clone())
    }

    /// Queues without a deferred queue.
    #[must_use]
    pub fn queues_without_deferred(&self) -> QueueSet {
        QueueSet::new(self.work.clone(), self.error.clone())
    }

    /// A fresh run state over [`queues`](Self::queues).
    #[must_use]
    pub fn state(&self) -> PipelineState {
        PipelineState::new(&self.queues(), self.maximum_failure_count)
    }

    /// Pipeline services reading this fixture's clock and sink.
    #[must_use]
    pub fn services(&self) -> PipelineServices {
        PipelineServices::new(self.factory.clone())
            .with_failure_policy(Arc::new(DefaultFailurePolicy::new(
                self.maximum_failure_count,
                IgnoreSchedule::fixed(&[]),
            )))
            .with_clock(self.clock.clone())
            .with_event_sink(self.events.clone())
    }

    /// Serializes a message onto `queue`.
    ///
    /// # Panics
    ///
    /// Panics if serialization or the enqueue fails.
    #[allow(clippy::expect_used)]
    pub async fn put(&self, queue: &dyn Queue, message: &TransportMessage) {
        let stream = self.serializer.serialize(message).expect("serialize");
        queue
            .enqueue(message.message_id, stream)
            .await
            .expect("enqueue");
    }

    /// Decodes the available entries of a memory queue in order.
    ///
    /// # Panics
    ///
    /// Panics if an entry is not a valid message.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn contents(&self, queue: &MemoryQueue) -> Vec<TransportMessage> {
        queue
            .snapshot()
            .iter()
            .map(|stream| self.serializer.deserialize(stream).expect("deserialize"))
            .collect()
    }
}

impl Default for TestBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A message of the given type with a small JSON payload.
#[must_use]
pub fn message(message_type: &str) -> TransportMessage {
    TransportMessage::new(message_type, br#"{"order":42}"#.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingHandler;

    #[tokio::test]
    async fn test_put_and_contents() {
        let bus = TestBus::new();
        let order = message("OrderPlaced");

        bus.put(bus.work.as_ref(), &order).await;

        assert_eq!(bus.contents(&bus.work), vec![order]);
        assert!(bus.contents(&bus.error).is_empty());
    }

    #[test]
    fn test_register_handler() {
        let bus = TestBus::new();
        bus.register("OrderPlaced", Arc::new(RecordingHandler::new("OrderPlaced")));

        assert_eq!(bus.factory.message_types_handled(), vec!["OrderPlaced".to_string()]);
    }
}
