//! Collaborators shared by the bus's pipelines.

use super::ReceiveExceptionObserver;
use crate::events::{EventSink, NoOpEventSink};
use crate::handlers::HandlerFactory;
use crate::policy::{DefaultFailurePolicy, FailurePolicy};
use crate::serialization::{JsonSerializer, Serializer};
use crate::utils::{Clock, SystemClock, Timestamp};
use std::sync::Arc;

/// Notified when the receive pipeline parks a message on the deferred queue.
pub trait DeferralListener: Send + Sync {
    /// A message that becomes due at `ignore_till` was deferred.
    fn message_deferred(&self, ignore_till: Timestamp);
}

/// Everything the stage constructors need.
#[derive(Clone)]
pub struct PipelineServices {
    /// Converts between envelopes and queue bytes.
    pub serializer: Arc<dyn Serializer>,
    /// Supplies and pools handlers.
    pub handler_factory: Arc<HandlerFactory>,
    /// Decides between retry and dead-letter.
    pub failure_policy: Arc<dyn FailurePolicy>,
    /// The time source.
    pub clock: Arc<dyn Clock>,
    /// Receives lifecycle events.
    pub event_sink: Arc<dyn EventSink>,
    /// Acknowledge messages with no registered handler instead of failing them.
    pub remove_messages_not_handled: bool,
    /// Told about newly deferred messages.
    pub deferral_listener: Option<Arc<dyn DeferralListener>>,
}

impl PipelineServices {
    /// Creates services with JSON serialization, the default failure policy
    /// and the system clock.
    #[must_use]
    pub fn new(handler_factory: Arc<HandlerFactory>) -> Self {
        Self {
            serializer: Arc::new(JsonSerializer::new()),
            handler_factory,
            failure_policy: Arc::new(DefaultFailurePolicy::default()),
            clock: Arc::new(SystemClock),
            event_sink: Arc::new(NoOpEventSink),
            remove_messages_not_handled: false,
            deferral_listener: None,
        }
    }

    /// Sets the serializer.
    #[must_use]
    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Sets the failure policy.
    #[must_use]
    pub fn with_failure_policy(mut self, failure_policy: Arc<dyn FailurePolicy>) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    /// Sets the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, event_sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = event_sink;
        self
    }

    /// Controls what happens to messages nobody handles.
    #[must_use]
    pub fn with_remove_messages_not_handled(mut self, remove: bool) -> Self {
        self.remove_messages_not_handled = remove;
        self
    }

    /// Sets the listener told about deferred messages.
    #[must_use]
    pub fn with_deferral_listener(mut self, listener: Arc<dyn DeferralListener>) -> Self {
        self.deferral_listener = Some(listener);
        self
    }

    /// Builds the failure observer both pipelines use.
    #[must_use]
    pub fn exception_observer(&self) -> ReceiveExceptionObserver {
        ReceiveExceptionObserver::new(
            Arc::clone(&self.failure_policy),
            Arc::clone(&self.serializer),
        )
        .with_clock(Arc::clone(&self.clock))
        .with_event_sink(Arc::clone(&self.event_sink))
    }
}

impl std::fmt::Debug for PipelineServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineServices")
            .field("serializer", &self.serializer)
            .field("handler_factory", &self.handler_factory)
            .field("clock", &self.clock)
            .field("remove_messages_not_handled", &self.remove_messages_not_handled)
            .field("deferral_listener", &self.deferral_listener.is_some())
            .finish_non_exhaustive()
    }
}
