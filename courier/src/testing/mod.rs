//! Testing utilities for courier pipelines.
//!
//! This module provides:
//! - Handler doubles that record or fail on demand
//! - A [`NullQueue`] that is always empty
//! - [`TestBus`], in-memory queues wired to a manual clock

mod fixtures;
mod mocks;

pub use fixtures::{message, TestBus};
pub use mocks::{FailingHandler, NullQueue, RecordingHandler};
