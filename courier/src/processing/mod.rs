//! Long-running processors driven by the bus.
//!
//! - [`InboxProcessor`] runs the receive pipeline for one worker.
//! - [`DeferredMessageProcessor`] returns deferred messages once due.

mod deferred;
mod inbox;

pub use deferred::{DeferredMessageProcessor, DeferredTick};
pub use inbox::{IdleBackoff, InboxProcessor};
