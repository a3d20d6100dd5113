//! Cooperative cancellation for worker tasks.
//!
//! This module provides:
//! - [`CancellationToken`], checked between units of work
//! - [`StructuredTaskGroup`], which owns the bus's spawned workers

mod task_group;
mod token;

pub use task_group::StructuredTaskGroup;
pub use token::CancellationToken;
