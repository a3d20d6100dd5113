//! # Courier
//!
//! The message-processing core of a service bus.
//!
//! Courier takes messages off a work queue and runs each one through a
//! pipeline of stages that decode it, dispatch it to a handler and
//! acknowledge it. It provides:
//!
//! - **Handler pooling**: reusable handlers are recycled between messages
//! - **Failure policy**: failed messages are retried with an ignore window,
//!   then moved to an error queue
//! - **Deferred delivery**: future-dated messages wait on a deferred queue
//!   and are returned once due, without rescanning the queue on every poll
//! - **Peek-lock queues**: a lease is only resolved after its successor
//!   message is safely enqueued
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use courier::prelude::*;
//! use std::sync::Arc;
//!
//! let bus = ServiceBus::builder()
//!     .with_work_queue(Arc::new(MemoryQueue::new("memory://work")))
//!     .with_error_queue(Arc::new(MemoryQueue::new("memory://error")))
//!     .with_deferred_queue(Arc::new(MemoryQueue::new("memory://deferred")))
//!     .with_handler(HandlerRegistration::of::<OrderPlacedHandler>("OrderPlaced"))
//!     .build()?;
//!
//! bus.start()?;
//! bus.send(&TransportMessage::new("OrderPlaced", payload)).await?;
//! bus.stop().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod bus;
pub mod cancellation;
pub mod config;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod message;
pub mod observability;
pub mod pipeline;
pub mod policy;
pub mod processing;
pub mod queue;
pub mod serialization;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bus::{ServiceBus, ServiceBusBuilder};
    pub use crate::cancellation::{CancellationToken, StructuredTaskGroup};
    pub use crate::config::{BusConfiguration, Configurator, ConfiguratorCollection};
    pub use crate::errors::{
        ConfigurationError, CourierError, PreconditionError, QueueError, Result,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::handlers::{
        DispatchOutcome, HandlerFactory, HandlerRegistration, HandlerRegistry, MessageHandler,
    };
    pub use crate::message::{AcknowledgementToken, ReceivedMessage, TransportMessage};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{
        Pipeline, PipelineException, PipelineState, PipelineStatus, QueueSet, Stage, StageFlow,
    };
    pub use crate::policy::{DefaultFailurePolicy, FailureAction, FailurePolicy, IgnoreSchedule};
    pub use crate::processing::DeferredMessageProcessor;
    pub use crate::queue::{MemoryQueue, Queue};
    pub use crate::serialization::{JsonSerializer, Serializer};
    pub use crate::utils::{Clock, SystemClock, Timestamp};
}
