//! The transport message envelope.

use crate::utils::{Timestamp, EARLIEST};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One recorded handling failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// The full failure description chain.
    pub description: String,
    /// When the failure was recorded.
    pub recorded_at: Timestamp,
}

impl FailureRecord {
    /// Creates a new failure record.
    #[must_use]
    pub fn new(description: impl Into<String>, recorded_at: Timestamp) -> Self {
        Self {
            description: description.into(),
            recorded_at,
        }
    }
}

/// A key/value header carried with a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportHeader {
    /// Header name.
    pub key: String,
    /// Header value.
    pub value: String,
}

/// The envelope that travels through the queues.
///
/// The payload is opaque to the bus; handlers interpret it according to
/// `message_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportMessage {
    /// Unique message identifier.
    pub message_id: Uuid,

    /// The message type name used for handler dispatch.
    pub message_type: String,

    /// The serialized application message.
    #[serde(with = "base64_bytes")]
    pub message: Vec<u8>,

    /// Optional correlation identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Ordered headers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<TransportHeader>,

    /// When the message was created.
    pub send_date: Timestamp,

    /// After this instant the message is discarded instead of dispatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<Timestamp>,

    /// The message is not processed before this instant.
    #[serde(default = "immediately", skip_serializing_if = "is_immediate")]
    pub ignore_till: Timestamp,

    /// Failure history, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure_messages: Vec<FailureRecord>,
}

const fn immediately() -> Timestamp {
    EARLIEST
}

fn is_immediate(ts: &Timestamp) -> bool {
    *ts == EARLIEST
}

impl TransportMessage {
    /// Creates a new message of the given type, sent now.
    #[must_use]
    pub fn new(message_type: impl Into<String>, message: Vec<u8>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            message_type: message_type.into(),
            message,
            correlation_id: None,
            headers: Vec::new(),
            send_date: crate::utils::now_utc(),
            expiry_date: None,
            ignore_till: EARLIEST,
            failure_messages: Vec::new(),
        }
    }

    /// Sets the message identifier.
    #[must_use]
    pub fn with_message_id(mut self, message_id: Uuid) -> Self {
        self.message_id = message_id;
        self
    }

    /// Sets the correlation identifier.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Appends a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(TransportHeader {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Sets the expiry date.
    #[must_use]
    pub fn with_expiry_date(mut self, expiry_date: Timestamp) -> Self {
        self.expiry_date = Some(expiry_date);
        self
    }

    /// Defers the message until the given instant.
    #[must_use]
    pub fn with_ignore_till(mut self, ignore_till: Timestamp) -> Self {
        self.ignore_till = ignore_till;
        self
    }

    /// Returns the first header value with the given key.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.key == key)
            .map(|h| h.value.as_str())
    }

    /// Number of recorded failures; doubles as the retry count.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failure_messages.len()
    }

    /// Returns true while the message is deferred.
    #[must_use]
    pub fn is_ignoring(&self, now: Timestamp) -> bool {
        self.ignore_till > now
    }

    /// Returns true once the expiry date has passed.
    #[must_use]
    pub fn has_expired(&self, now: Timestamp) -> bool {
        self.expiry_date.is_some_and(|expiry| expiry <= now)
    }

    /// Appends a failure record.
    pub fn register_failure(&mut self, description: impl Into<String>, now: Timestamp) {
        self.failure_messages.push(FailureRecord::new(description, now));
    }

    /// Defers the message until the given instant.
    pub fn defer_until(&mut self, ignore_till: Timestamp) {
        self.ignore_till = ignore_till;
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
