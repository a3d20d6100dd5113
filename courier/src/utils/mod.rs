//! Time utilities.

mod clock;
pub mod timestamps;

pub use clock::{Clock, ManualClock, SystemClock};
pub use timestamps::{add_window, format_iso8601, now_utc, Timestamp, EARLIEST, LATEST};
