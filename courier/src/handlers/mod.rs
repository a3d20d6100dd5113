//! Message handler contracts, registration and pooling.
//!
//! This module provides:
//! - The [`MessageHandler`] trait and the [`DispatchOutcome`] it reports
//! - An explicit registration map from message type to constructor
//! - The pooling [`HandlerFactory`]

mod factory;
mod registry;

pub use factory::HandlerFactory;
pub use registry::{
    HandlerConstructor, HandlerRegistration, HandlerRegistry, HandlerResolver, HandlerSource,
};

use crate::message::TransportMessage;
use async_trait::async_trait;

/// The result of dispatching one message to its handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler processed the message.
    Handled,
    /// The handler failed.
    Failed {
        /// Failure description, including its cause chain.
        reason: String,
        /// False when retrying can never succeed.
        recoverable: bool,
    },
}

impl DispatchOutcome {
    /// A failure that may succeed on retry.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            recoverable: true,
        }
    }

    /// A failure that goes straight to the error queue.
    #[must_use]
    pub fn unrecoverable(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            recoverable: false,
        }
    }

    /// Maps an application result; errors are recoverable and keep their
    /// full cause chain.
    #[must_use]
    pub fn from_result(result: anyhow::Result<()>) -> Self {
        match result {
            Ok(()) => Self::Handled,
            Err(err) => Self::failed(format!("{err:#}")),
        }
    }

    /// Returns true if the message was handled.
    #[must_use]
    pub const fn is_handled(&self) -> bool {
        matches!(self, Self::Handled)
    }
}

/// Processes messages of the type(s) it declares.
///
/// Only a handler that declares exactly one message type is eligible for
/// pooled reuse.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// The message types this handler accepts.
    fn message_types(&self) -> Vec<String>;

    /// Whether one instance may be reused for many messages.
    fn is_reusable(&self) -> bool;

    /// A display name for logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Handles one message.
    async fn handle(&self, message: &TransportMessage) -> DispatchOutcome;

    /// Releases resources held by a non-reusable handler.
    fn dispose(&self) {}
}
