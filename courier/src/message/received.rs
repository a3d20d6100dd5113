//! Dequeued entries and the leases that guard them.

use std::fmt;
use uuid::Uuid;

/// An opaque lease on one physical queue entry.
///
/// The token is move-only: [`Queue::acknowledge`](crate::queue::Queue::acknowledge)
/// and [`Queue::release`](crate::queue::Queue::release) consume it, so a lease
/// can be resolved at most once.
#[derive(PartialEq, Eq, Hash)]
pub struct AcknowledgementToken(Uuid);

impl AcknowledgementToken {
    /// Creates a fresh token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps a provider-assigned lease identifier.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the lease identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.0
    }
}

impl Default for AcknowledgementToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AcknowledgementToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AcknowledgementToken").field(&self.0).finish()
    }
}

/// A raw entry read from a queue, still leased.
#[derive(Debug)]
pub struct ReceivedMessage {
    stream: Vec<u8>,
    token: AcknowledgementToken,
}

impl ReceivedMessage {
    /// Creates a received message.
    #[must_use]
    pub fn new(stream: Vec<u8>, token: AcknowledgementToken) -> Self {
        Self { stream, token }
    }

    /// Returns the serialized bytes.
    #[must_use]
    pub fn stream(&self) -> &[u8] {
        &self.stream
    }

    /// Returns the lease token.
    #[must_use]
    pub fn token(&self) -> &AcknowledgementToken {
        &self.token
    }

    /// Splits the entry into its bytes and lease.
    #[must_use]
    pub fn into_parts(self) -> (Vec<u8>, AcknowledgementToken) {
        (self.stream, self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique() {
        assert_ne!(AcknowledgementToken::new(), AcknowledgementToken::new());
    }

    #[test]
    fn test_token_from_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(AcknowledgementToken::from_uuid(id).id(), id);
    }

    #[test]
    fn test_received_message_parts() {
        let token = AcknowledgementToken::new();
        let id = token.id();
        let received = ReceivedMessage::new(vec![1, 2, 3], token);

        assert_eq!(received.stream(), &[1, 2, 3]);
        assert_eq!(received.token().id(), id);

        let (stream, token) = received.into_parts();
        assert_eq!(stream, vec![1, 2, 3]);
        assert_eq!(token.id(), id);
    }
}
