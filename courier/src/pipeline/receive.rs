//! Stages of the inbox (receive) pipeline.

use super::{
    DeferralListener, Pipeline, PipelineException, PipelineServices, PipelineState, Stage,
    StageFlow,
};
use crate::handlers::{DispatchOutcome, HandlerFactory};
use crate::message::{ReceivedMessage, TransportMessage};
use crate::serialization::Serializer;
use crate::utils::{format_iso8601, Clock};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builds the pipeline an inbox worker runs for each message.
///
/// Stages: receive, decode, expiry and deferral check, dispatch,
/// acknowledge.
#[must_use]
pub fn receive_pipeline(services: &PipelineServices) -> Pipeline {
    Pipeline::new("inbox")
        .with_stage(GetWorkMessageStage)
        .with_stage(DeserializeTransportMessageStage::new(Arc::clone(
            &services.serializer,
        )))
        .with_stage(CheckDeliveryStage {
            clock: Arc::clone(&services.clock),
            listener: services.deferral_listener.clone(),
        })
        .with_stage(DispatchMessageStage {
            factory: Arc::clone(&services.handler_factory),
            remove_messages_not_handled: services.remove_messages_not_handled,
        })
        .with_stage(AcknowledgeMessageStage)
        .with_observer(Arc::new(services.exception_observer()))
        .with_event_sink(Arc::clone(&services.event_sink))
}

pub(crate) fn transport_message(state: &PipelineState) -> Result<&TransportMessage, PipelineException> {
    state
        .transport_message
        .as_ref()
        .ok_or_else(|| PipelineException::new("No transport message has been decoded"))
}

pub(crate) fn received_message(state: &PipelineState) -> Result<&ReceivedMessage, PipelineException> {
    state
        .received_message
        .as_ref()
        .ok_or_else(|| PipelineException::new("No message has been received"))
}

/// Acknowledges the current lease on the queue it came from.
pub(crate) async fn acknowledge_received(state: &mut PipelineState) -> Result<(), PipelineException> {
    let received = state
        .received_message
        .take()
        .ok_or_else(|| PipelineException::new("No message lease to acknowledge"))?;
    let (_, token) = received.into_parts();
    state.source_queue().acknowledge(token).await?;
    Ok(())
}

/// Leases the next message from the work queue. Ends the run when the queue
/// is empty.
#[derive(Debug)]
pub struct GetWorkMessageStage;

#[async_trait]
impl Stage for GetWorkMessageStage {
    fn name(&self) -> &str {
        "get_work_message"
    }

    async fn execute(&self, state: &mut PipelineState) -> Result<StageFlow, PipelineException> {
        let work_queue = Arc::clone(&state.work_queue);
        match work_queue.dequeue().await? {
            Some(received) => {
                state.source_queue = Some(work_queue);
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

/// Decodes the leased bytes into a [`TransportMessage`].
#[derive(Debug)]
pub struct DeserializeTransportMessageStage {
    serializer: Arc<dyn Serializer>,
}

impl DeserializeTransportMessageStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(serializer: Arc<dyn Serializer>) -> Self {
        Self { serializer }
    }
}

#[async_trait]
impl Stage for DeserializeTransportMessageStage {
    fn name(&self) -> &str {
        "deserialize_transport_message"
    }

    async fn execute(&self, state: &mut PipelineState) -> Result<StageFlow, PipelineException> {
        let message = self
            .serializer
            .deserialize(received_message(state)?.stream())?;
        state.transport_message = Some(message);
        Ok(StageFlow::Continue)
    }
}

/// Discards expired messages and parks future-dated ones.
pub struct CheckDeliveryStage {
    clock: Arc<dyn Clock>,
    listener: Option<Arc<dyn DeferralListener>>,
}

impl std::fmt::Debug for CheckDeliveryStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckDeliveryStage")
            .field("clock", &self.clock)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

#[async_trait]
impl Stage for CheckDeliveryStage {
    fn name(&self) -> &str {
        "check_delivery"
    }

    async fn execute(&self, state: &mut PipelineState) -> Result<StageFlow, PipelineException> {
        let now = self.clock.now();
        let (message_id, ignore_till, expired) = {
            let message = transport_message(state)?;
            (message.message_id, message.ignore_till, message.has_expired(now))
        };

        if expired {
            acknowledge_received(state).await?;
            info!(%message_id, "Discarded expired message");
            return Ok(StageFlow::Complete);
        }

        if ignore_till <= now {
            return Ok(StageFlow::Continue);
        }

        let stream = received_message(state)?.stream().to_vec();
        if let Some(deferred) = state.deferred_queue.clone() {
            deferred.enqueue(message_id, stream).await?;
            acknowledge_received(state).await?;
            if let Some(listener) = &self.listener {
                listener.message_deferred(ignore_till);
            }
            debug!(
                %message_id,
                ignore_till = %format_iso8601(&ignore_till),
                deferred_queue = deferred.uri(),
                "Moved message to the deferred queue"
            );
        } else {
            let work_queue = Arc::clone(&state.work_queue);
            work_queue.enqueue(message_id, stream).await?;
            acknowledge_received(state).await?;
            // The message was put straight back; idle instead of spinning on it.
            state.reset_working();
            debug!(
                %message_id,
                ignore_till = %format_iso8601(&ignore_till),
                "Returned deferred message to the work queue"
            );
        }

        Ok(StageFlow::Complete)
    }
}

/// Resolves a handler and invokes it.
#[derive(Debug)]
pub struct DispatchMessageStage {
    factory: Arc<HandlerFactory>,
    remove_messages_not_handled: bool,
}

impl DispatchMessageStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(factory: Arc<HandlerFactory>, remove_messages_not_handled: bool) -> Self {
        Self {
            factory,
            remove_messages_not_handled,
        }
    }
}

#[async_trait]
impl Stage for DispatchMessageStage {
    fn name(&self) -> &str {
        "dispatch_message"
    }

    async fn execute(&self, state: &mut PipelineState) -> Result<StageFlow, PipelineException> {
        let handler = self.factory.get_handler(transport_message(state)?)?;

        let Some(handler) = handler else {
            let message = transport_message(state)?;
            let message_type = message.message_type.clone();
            if self.remove_messages_not_handled {
                let message_id = message.message_id;
                acknowledge_received(state).await?;
                warn!(%message_id, %message_type, "Removed message with no registered handler");
                return Ok(StageFlow::Complete);
            }
            return Err(PipelineException::unrecoverable(format!(
                "No handler has been registered for message type '{message_type}'"
            )));
        };

        state.handler_name = Some(handler.name().to_string());
        let outcome = handler.handle(transport_message(state)?).await;
        self.factory.release_handler(Some(handler));

        match outcome {
            DispatchOutcome::Handled => Ok(StageFlow::Continue),
            DispatchOutcome::Failed {
                reason,
                recoverable: true,
            } => Err(PipelineException::new(reason)),
            DispatchOutcome::Failed {
                reason,
                recoverable: false,
            } => Err(PipelineException::unrecoverable(reason)),
        }
    }
}

/// Acknowledges the lease after successful dispatch.
#[derive(Debug)]
pub struct AcknowledgeMessageStage;

#[async_trait]
impl Stage for AcknowledgeMessageStage {
    fn name(&self) -> &str {
        "acknowledge_message"
    }

    async fn execute(&self, state: &mut PipelineState) -> Result<StageFlow, PipelineException> {
        acknowledge_received(state).await?;
        Ok(StageFlow::Continue)
    }
}
