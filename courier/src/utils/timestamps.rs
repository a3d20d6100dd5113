//! Timestamp helpers shared by messages, policies and the deferred processor.

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use std::time::Duration;

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// The earliest representable timestamp. A message ignored until this point is
/// immediately due.
pub const EARLIEST: Timestamp = DateTime::<Utc>::MIN_UTC;

/// The latest representable timestamp, used as "never".
pub const LATEST: Timestamp = DateTime::<Utc>::MAX_UTC;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Adds a window to a timestamp, saturating at [`LATEST`].
#[must_use]
pub fn add_window(timestamp: Timestamp, window: Duration) -> Timestamp {
    TimeDelta::from_std(window)
        .ok()
        .and_then(|delta| timestamp.checked_add_signed(delta))
        .unwrap_or(LATEST)
}

/// Formats a timestamp as RFC 3339 with microsecond precision.
#[must_use]
pub fn format_iso8601(dt: &Timestamp) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}
