//! Test doubles for handlers and queues.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use uuid::Uuid;

use crate::errors::QueueError;
use crate::handlers::{DispatchOutcome, MessageHandler};
use crate::message::{AcknowledgementToken, ReceivedMessage, TransportMessage};
use crate::queue::Queue;

/// A handler that succeeds and records every message it sees.
#[derive(Debug)]
pub struct RecordingHandler {
    message_types: Vec<String>,
    reusable: bool,
    handled: Mutex<Vec<Uuid>>,
    disposed: AtomicBool,
}

impl RecordingHandler {
    /// Creates a reusable handler for one message type.
    #[must_use]
    pub fn new(message_type: &str) -> Self {
        Self::for_types(&[message_type])
    }

    /// Creates a reusable handler declaring several message types.
    #[must_use]
    pub fn for_types(message_types: &[&str]) -> Self {
        Self {
            message_types: message_types.iter().map(ToString::to_string).collect(),
            reusable: true,
            handled: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Sets whether the factory may pool this handler.
    #[must_use]
    pub fn reusable(mut self, reusable: bool) -> Self {
        self.reusable = reusable;
        self
    }

    /// Number of messages handled.
    #[must_use]
    pub fn handled_count(&self) -> usize {
        self.handled.lock().len()
    }

    /// Identifiers of the handled messages, in order.
    #[must_use]
    pub fn handled_ids(&self) -> Vec<Uuid> {
        self.handled.lock().clone()
    }

    /// Returns true once the factory disposed the handler.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    fn message_types(&self) -> Vec<String> {
        self.message_types.clone()
    }

    fn is_reusable(&self) -> bool {
        self.reusable
    }

    async fn handle(&self, message: &TransportMessage) -> DispatchOutcome {
        self.handled.lock().push(message.message_id);
        DispatchOutcome::Handled
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

/// A handler that fails a configurable number of times, then succeeds.
#[derive(Debug)]
pub struct FailingHandler {
    message_type: String,
    reason: String,
    recoverable: bool,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
}

impl FailingHandler {
    /// A handler that always fails with a recoverable error.
    #[must_use]
    pub fn new(message_type: &str, reason: &str) -> Self {
        Self {
            message_type: message_type.to_string(),
            reason: reason.to_string(),
            recoverable: true,
            failures_left: AtomicUsize::new(usize::MAX),
            attempts: AtomicUsize::new(0),
        }
    }

    /// A handler that always fails with an unrecoverable error.
    #[must_use]
    pub fn unrecoverable(message_type: &str, reason: &str) -> Self {
        Self {
            recoverable: false,
            ..Self::new(message_type, reason)
        }
    }

    /// Fails only the first `failures` attempts.
    #[must_use]
    pub fn failing_times(self, failures: usize) -> Self {
        self.failures_left.store(failures, Ordering::SeqCst);
        self
    }

    /// Number of times `handle` was called.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler for FailingHandler {
    fn message_types(&self) -> Vec<String> {
        vec![self.message_type.clone()]
    }

    fn is_reusable(&self) -> bool {
        true
    }

    async fn handle(&self, _message: &TransportMessage) -> DispatchOutcome {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        match (failing, self.recoverable) {
            (false, _) => DispatchOutcome::Handled,
            (true, true) => DispatchOutcome::failed(self.reason.clone()),
            (true, false) => DispatchOutcome::unrecoverable(self.reason.clone()),
        }
    }
}

/// A queue that is always empty and rejects writes.
#[derive(Debug, Clone)]
pub struct NullQueue {
    uri: String,
}

impl NullQueue {
    /// Creates a null queue with the given URI.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    fn unsupported(&self, operation: &str) -> QueueError {
        QueueError::new(&self.uri, format!("{operation} is not supported by a null queue"))
    }
}

impl Default for NullQueue {
    fn default() -> Self {
        Self::new("null://")
    }
}

#[async_trait]
impl Queue for NullQueue {
    fn uri(&self) -> &str {
        &self.uri
    }

    async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(true)
    }

    async fn enqueue(&self, _message_id: Uuid, _stream: Vec<u8>) -> Result<(), QueueError> {
        Err(self.unsupported("enqueue"))
    }

    async fn dequeue(&self) -> Result<Option<ReceivedMessage>, QueueError> {
        Ok(None)
    }

    async fn acknowledge(&self, _token: AcknowledgementToken) -> Result<(), QueueError> {
        Err(self.unsupported("acknowledge"))
    }

    async fn release(&self, _token: AcknowledgementToken) -> Result<(), QueueError> {
        Err(self.unsupported("release"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_handler() {
        let handler = RecordingHandler::new("OrderPlaced").reusable(false);
        let message = TransportMessage::new("OrderPlaced", Vec::new());

        assert!(handler.handle(&message).await.is_handled());
        handler.dispose();

        assert_eq!(handler.handled_ids(), vec![message.message_id]);
        assert!(handler.is_disposed());
        assert!(!handler.is_reusable());
    }

    #[tokio::test]
    async fn test_failing_handler_recovers_after_failures() {
        let handler = FailingHandler::new("OrderPlaced", "timeout").failing_times(2);
        let message = TransportMessage::new("OrderPlaced", Vec::new());

        assert_eq!(handler.handle(&message).await, DispatchOutcome::failed("timeout"));
        assert_eq!(handler.handle(&message).await, DispatchOutcome::failed("timeout"));
        assert!(handler.handle(&message).await.is_handled());
        assert_eq!(handler.attempts(), 3);
    }

    #[tokio::test]
    async fn test_null_queue() {
        let queue = NullQueue::default();
        let err = queue.enqueue(Uuid::new_v4(), b"x".to_vec()).await.unwrap_err();
        assert_eq!(err.to_string(), "Queue 'null://' failed: enqueue is not supported by a null queue");

        assert!(queue.is_empty().await.unwrap());
        assert!(queue.dequeue().await.unwrap().is_none());
        assert_eq!(queue.uri(), "null://");
    }
}
