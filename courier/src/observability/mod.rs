//! Logging initialization and timing helpers.

use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Output format for process logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Installs a global tracing subscriber filtered by `RUST_LOG`.
///
/// Defaults to `info` when `RUST_LOG` is unset. Calling this more than once
/// is harmless: later calls leave the first subscriber in place.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
}

/// Measures the wall-clock duration of a named operation.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the operation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the timer and returns the duration in milliseconds.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}
