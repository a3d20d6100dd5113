//! The pipeline engine and the bus's two pipelines.
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s plus exception
//! observers. Each run gets its own [`PipelineState`]; a stage failure
//! becomes a [`PipelineException`] that the observers deal with, after
//! which the run is aborted.
//!
//! - [`receive_pipeline`] processes one message from the work queue.
//! - [`deferred_pipeline`] examines one message on the deferred queue.

mod deferred;
mod engine;
mod observer;
mod receive;
mod services;
mod stage;
mod state;
mod status;


pub use deferred::{
    deferred_pipeline, DeferredExceptionObserver, GetDeferredMessageStage,
    ProcessDeferredMessageStage,
};
pub use engine::{ExceptionObserver, Pipeline};
pub use observer::ReceiveExceptionObserver;
pub use receive::{
    receive_pipeline, AcknowledgeMessageStage, CheckDeliveryStage,
    DeserializeTransportMessageStage, DispatchMessageStage, GetWorkMessageStage,
};
pub use services::{DeferralListener, PipelineServices};
pub use stage::{FnStage, PipelineException, Stage, StageFlow};
pub use state::{PipelineState, QueueSet};
pub use status::PipelineStatus;
