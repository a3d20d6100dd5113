//! Stages of the deferred pipeline.

use super::observer::release_lease;
use super::receive::{acknowledge_received, received_message, transport_message};
use super::{
    DeserializeTransportMessageStage, ExceptionObserver, Pipeline, PipelineException,
    PipelineServices, PipelineState, Stage, StageFlow,
};
use crate::events::EventSink;
use crate::utils::Clock;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Builds the pipeline the deferred message processor runs once per tick.
///
/// Each run leases one message from the deferred queue. A message that is
/// due moves to the work queue; one that is not is rotated to the back of
/// the deferred queue. Failures only release the lease: nothing has been
/// dispatched yet, so the failure policy does not apply.
#[must_use]
pub fn deferred_pipeline(services: &PipelineServices) -> Pipeline {
    Pipeline::new("deferred")
        .with_stage(GetDeferredMessageStage)
        .with_stage(DeserializeTransportMessageStage::new(Arc::clone(
            &services.serializer,
        )))
        .with_stage(ProcessDeferredMessageStage {
            clock: Arc::clone(&services.clock),
        })
        .with_observer(Arc::new(DeferredExceptionObserver::new(Arc::clone(
            &services.event_sink,
        ))))
        .with_event_sink(Arc::clone(&services.event_sink))
}

/// Puts the leased message back on the deferred queue untouched.
///
/// The message keeps its ignore-till and failure history, so it is never
/// delivered before it is due.
pub struct DeferredExceptionObserver {
    event_sink: Arc<dyn EventSink>,
}

impl DeferredExceptionObserver {
    /// Creates the observer.
    #[must_use]
    pub fn new(event_sink: Arc<dyn EventSink>) -> Self {
        Self { event_sink }
    }
}

#[async_trait]
impl ExceptionObserver for DeferredExceptionObserver {
    async fn on_exception(&self, pipeline: &str, state: &mut PipelineState) {
        if state.is_exception_handled() {
            return;
        }
        let description = state
            .exception()
            .map(|exception| exception.description().to_string())
            .unwrap_or_default();

        self.event_sink
            .emit(
                "pipeline.exception.handling",
                Some(json!({ "pipeline": pipeline, "description": description })),
            )
            .await;

        warn!(
            message_id = ?state.transport_message.as_ref().map(|m| m.message_id),
            error = %description,
            "Deferred message could not be processed; releasing it"
        );
        let source = state.source_queue();
        release_lease(state, source.as_ref()).await;

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

impl std::fmt::Debug for DeferredExceptionObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredExceptionObserver").finish_non_exhaustive()
    }
}

/// Leases the next message from the deferred queue.
#[derive(Debug)]
pub struct GetDeferredMessageStage;

#[async_trait]
impl Stage for GetDeferredMessageStage {
    fn name(&self) -> &str {
        "get_deferred_message"
    }

    async fn execute(&self, state: &mut PipelineState) -> Result<StageFlow, PipelineException> {
        let Some(deferred) = state.deferred_queue.clone() else {
            return Ok(StageFlow::Complete);
        };
        match deferred.dequeue().await? {
            Some(received) => {
                state.source_queue = Some(deferred);
                state.received_message = Some(received);
                state.set_working();
                Ok(StageFlow::Continue)
            }
            None => {
                state.reset_working();
                Ok(StageFlow::Complete)
            }
        }
    }
}

/// Returns a due message to the work queue, or rotates it.
#[derive(Debug)]
pub struct ProcessDeferredMessageStage {
    clock: Arc<dyn Clock>,
}

impl ProcessDeferredMessageStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl Stage for ProcessDeferredMessageStage {
    fn name(&self) -> &str {
        "process_deferred_message"
    }

    async fn execute(&self, state: &mut PipelineState) -> Result<StageFlow, PipelineException> {
        let now = self.clock.now();
        let (message_id, due) = {
            let message = transport_message(state)?;
            (message.message_id, !message.is_ignoring(now))
        };
        let stream = received_message(state)?.stream().to_vec();

        // Always enqueue the copy before acknowledging the original.
        if due {
            let work_queue = Arc::clone(&state.work_queue);
            work_queue.enqueue(message_id, stream).await?;
            acknowledge_received(state).await?;
            state.deferred_message_returned = true;
            debug!(%message_id, work_queue = work_queue.uri(), "Returned deferred message");
        } else {
            let deferred = state.source_queue();
            deferred.enqueue(message_id, stream).await?;
            acknowledge_received(state).await?;
            state.deferred_message_returned = false;
            trace!(%message_id, "Deferred message is not due yet");
        }

        Ok(StageFlow::Continue)
    }
}
