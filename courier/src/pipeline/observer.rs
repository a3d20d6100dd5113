//! Failure handling for message pipelines.

use super::{ExceptionObserver, PipelineException, PipelineState};
use crate::events::{EventSink, NoOpEventSink};
use crate::message::TransportMessage;
use crate::policy::FailurePolicy;
use crate::queue::Queue;
use crate::serialization::Serializer;
use crate::utils::{add_window, format_iso8601, Clock, SystemClock};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Retries or dead-letters the message whose processing failed.
///
/// On the first notification for a raised exception the observer:
///
/// 1. releases the lease if the message could not be decoded,
/// 2. otherwise asks the [`FailurePolicy`] for a decision,
/// 3. appends a failure record,
/// 4. re-enqueues the message on the work queue with an ignore window, or
///    enqueues it on the error queue,
/// 5. acknowledges the original lease only after that enqueue succeeded.
///
/// If the enqueue fails the original lease is released instead, so the
/// message is never lost. The run is then marked handled and aborted.
pub struct ReceiveExceptionObserver {
    policy: Arc<dyn FailurePolicy>,
    serializer: Arc<dyn Serializer>,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
}

impl ReceiveExceptionObserver {
    /// Creates an observer that reads time from the system clock.
    #[must_use]
    pub fn new(policy: Arc<dyn FailurePolicy>, serializer: Arc<dyn Serializer>) -> Self {
        Self {
            policy,
            serializer,
            clock: Arc::new(SystemClock),
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the clock used for failure timestamps and ignore windows.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the sink that receives handling events.
    #[must_use]
    pub fn with_event_sink(mut self, event_sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = event_sink;
        self
    }

    async fn handle(&self, state: &mut PipelineState, exception: &PipelineException) {
        let source = state.source_queue();

        let Some(mut message) = state.transport_message.take() else {
            release_lease(state, source.as_ref()).await;
            return;
        };

        let action = self.policy.evaluate(&message, exception);
        let now = self.clock.now();
        message.register_failure(exception.description(), now);

        let retry = action.retry && !exception.is_unrecoverable();
        if retry {
            message.defer_until(add_window(now, action.ignore_window));
        }

        let target = if retry {
            Arc::clone(&state.work_queue)
        } else {
            Arc::clone(&state.error_queue)
        };

        match self.requeue(&message, target.as_ref()).await {
            Ok(()) => {
                if retry {
                    warn!(
                        message_id = %message.message_id,
                        message_type = %message.message_type,
                        failures = message.failure_count(),
                        ignore_till = %format_iso8601(&message.ignore_till),
                        error = %exception,
                        "Message will be retried"
                    );
                } else {
                    error!(
                        message_id = %message.message_id,
                        message_type = %message.message_type,
                        failures = message.failure_count(),
                        error_queue = target.uri(),
                        error = %exception,
                        "Message moved to the error queue"
                    );
                }
                acknowledge_lease(state, source.as_ref()).await;
            }
            Err(err) => {
                error!(
                    message_id = %message.message_id,
                    queue = target.uri(),
                    error = %err,
                    "Could not enqueue failed message; releasing the original"
                );
                release_lease(state, source.as_ref()).await;
            }
        }

        state.transport_message = Some(message);
    }

    async fn requeue(&self, message: &TransportMessage, target: &dyn Queue) -> crate::errors::Result<()> {
        let stream = self.serializer.serialize(message)?;
        target.enqueue(message.message_id, stream).await?;
        Ok(())
    }
}

async fn acknowledge_lease(state: &mut PipelineState, source: &dyn Queue) {
    let Some(received) = state.received_message.take() else {
        return;
    };
    let (_, token) = received.into_parts();
    if let Err(err) = source.acknowledge(token).await {
        error!(queue = source.uri(), error = %err, "Failed to acknowledge original message");
    }
}

pub(super) async fn release_lease(state: &mut PipelineState, source: &dyn Queue) {
    let Some(received) = state.received_message.take() else {
        return;
    };
    let (_, token) = received.into_parts();
    match source.release(token).await {
        Ok(()) => info!(queue = source.uri(), "Released message back to its queue"),
        Err(err) => error!(queue = source.uri(), error = %err, "Failed to release message"),
    }
}

#[async_trait]
impl ExceptionObserver for ReceiveExceptionObserver {
    async fn on_exception(&self, pipeline: &str, state: &mut PipelineState) {
        if state.is_exception_handled() {
            return;
        }
        let Some(exception) = state.exception().cloned() else {
            return;
        };

        self.event_sink
            .emit(
                "pipeline.exception.handling",
                Some(json!({ "pipeline": pipeline, "description": exception.description() })),
            )
            .await;

        self.handle(state, &exception).await;

        state.mark_exception_handled();
        self.event_sink
            .emit(
                "pipeline.exception.handled",
                Some(json!({
                    "pipeline": pipeline,
                    "message_id": state.transport_message.as_ref().map(|m| m.message_id.to_string()),
                })),
            )
            .await;
        state.abort();
    }
}

impl std::fmt::Debug for ReceiveExceptionObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiveExceptionObserver")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
