//! The queue contract implemented by transport collaborators.
//!
//! Concrete durable transports live outside this crate. [`MemoryQueue`] is a
//! peek-lock reference implementation for tests and local development.

mod memory;

pub use memory::MemoryQueue;

use crate::errors::QueueError;
use crate::message::{AcknowledgementToken, ReceivedMessage};
use async_trait::async_trait;
use uuid::Uuid;

/// A queue with peek-lock semantics.
///
/// `dequeue` leases one entry and hands back a token. The lease stays open
/// until the token is passed to exactly one of `acknowledge` (the entry is
/// removed for good) or `release` (the entry becomes available again,
/// unmodified).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Queue: Send + Sync {
    /// Returns the queue's URI, used in logs and errors.
    fn uri(&self) -> &str;

    /// Returns true when no entry is available.
    async fn is_empty(&self) -> Result<bool, QueueError>;

    /// Appends a serialized message.
    async fn enqueue(&self, message_id: Uuid, stream: Vec<u8>) -> Result<(), QueueError>;

    /// Leases the next available entry, if any.
    async fn dequeue(&self) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Commits removal of a leased entry.
    async fn acknowledge(&self, token: AcknowledgementToken) -> Result<(), QueueError>;

    /// Returns a leased entry to availability.
    async fn release(&self, token: AcknowledgementToken) -> Result<(), QueueError>;
}
