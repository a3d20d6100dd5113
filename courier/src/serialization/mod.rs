//! Conversion between transport messages and queue bytes.

use crate::errors::{CourierError, Result};
use crate::message::TransportMessage;
use std::fmt::Debug;

/// Turns transport messages into bytes and back.
///
/// Implementations must round-trip exactly: every field, including the full
/// failure history and all timestamps, survives `deserialize(serialize(m))`.
pub trait Serializer: Send + Sync + Debug {
    /// Serializes a message.
    fn serialize(&self, message: &TransportMessage) -> Result<Vec<u8>>;

    /// Deserializes a message.
    fn deserialize(&self, stream: &[u8]) -> Result<TransportMessage>;
}

/// JSON serializer backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer {
    pretty: bool,
}

impl JsonSerializer {
    /// Creates a compact JSON serializer.
    #[must_use]
    pub const fn new() -> Self {
        Self { pretty: false }
    }

    /// Creates a serializer that indents its output.
    #[must_use]
    pub const fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl Serializer for JsonSerializer {
    fn serialize(&self, message: &TransportMessage) -> Result<Vec<u8>> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(message)?
        } else {
            serde_json::to_vec(message)?
        };
        Ok(bytes)
    }

    fn deserialize(&self, stream: &[u8]) -> Result<TransportMessage> {
        if stream.is_empty() {
            return Err(CourierError::Serialization(
                "cannot deserialize an empty stream".to_string(),
            ));
        }
        Ok(serde_json::from_slice(stream)?)
    }
}
