//! Transport envelopes and queue leases.
//!
//! This module provides:
//! - The transport message envelope with its failure history
//! - Received queue entries and their acknowledgement tokens

mod received;
mod transport;

pub use received::{AcknowledgementToken, ReceivedMessage};
pub use transport::{FailureRecord, TransportHeader, TransportMessage};
