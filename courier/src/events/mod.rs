//! Lifecycle event emission.
//!
//! Pipelines and exception observers report what they do through an
//! [`EventSink`]. Events are named with dotted prefixes:
//!
//! - `pipeline.started`, `pipeline.completed`, `pipeline.aborted`
//! - `pipeline.exception`
//! - `pipeline.exception.handling`, `pipeline.exception.handled`

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RecordedEvent};
