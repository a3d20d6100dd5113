//! In-memory peek-lock queue.

use super::Queue;
use crate::errors::QueueError;
use crate::message::{AcknowledgementToken, ReceivedMessage};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredEntry {
    message_id: Uuid,
    stream: Vec<u8>,
}

#[derive(Debug, Default)]
struct MemoryQueueState {
    available: VecDeque<StoredEntry>,
    leased: HashMap<Uuid, StoredEntry>,
}

/// A process-local queue.
///
/// Released entries go to the back of the queue, so an entry that keeps
/// failing cannot hold up the ones behind it.
#[derive(Debug)]
pub struct MemoryQueue {
    uri: String,
    state: Mutex<MemoryQueueState>,
}

impl MemoryQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            state: Mutex::new(MemoryQueueState::default()),
        }
    }

    /// Number of available (not leased) entries.
    #[must_use]
    pub fn available_count(&self) -> usize {
        self.state.lock().available.len()
    }

    /// Number of entries currently leased.
    #[must_use]
    pub fn leased_count(&self) -> usize {
        self.state.lock().leased.len()
    }

    /// Returns copies of the available entries' bytes in queue order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .available
            .iter()
            .map(|entry| entry.stream.clone())
            .collect()
    }

    /// Returns the identifiers of the available entries in queue order.
    #[must_use]
    pub fn message_ids(&self) -> Vec<Uuid> {
        self.state
            .lock()
            .available
            .iter()
            .map(|entry| entry.message_id)
            .collect()
    }

    fn unknown_token(&self, token: &AcknowledgementToken) -> QueueError {
        QueueError::new(&self.uri, format!("unknown acknowledgement token {}", token.id()))
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    fn uri(&self) -> &str {
        &self.uri
    }

    async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.state.lock().available.is_empty())
    }

    async fn enqueue(&self, message_id: Uuid, stream: Vec<u8>) -> Result<(), QueueError> {
        self.state
            .lock()
            .available
            .push_back(StoredEntry { message_id, stream });
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<ReceivedMessage>, QueueError> {
        let mut state = self.state.lock();
        let Some(entry) = state.available.pop_front() else {
            return Ok(None);
        };

        let token = AcknowledgementToken::new();
        let stream = entry.stream.clone();
        state.leased.insert(token.id(), entry);

        Ok(Some(ReceivedMessage::new(stream, token)))
    }

    async fn acknowledge(&self, token: AcknowledgementToken) -> Result<(), QueueError> {
        let removed = self.state.lock().leased.remove(&token.id());
        match removed {
            Some(_) => Ok(()),
            None => Err(self.unknown_token(&token)),
        }
    }

    async fn release(&self, token: AcknowledgementToken) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        let Some(entry) = state.leased.remove(&token.id()) else {
            drop(state);
            return Err(self.unknown_token(&token));
        };
        state.available.push_back(entry);
        Ok(())
    }
}
