//! Bus configuration.
//!
//! [`BusConfiguration`] holds the tunables that shape message processing.
//! It can be deserialized from JSON (every field is optional) and adjusted
//! programmatically through [`Configurator`]s before the bus starts.

mod configurator;

pub use configurator::{Configurator, ConfiguratorCollection};

use crate::errors::{ConfigurationError, Result};
use crate::policy::IgnoreSchedule;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables for the message-processing core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfiguration {
    /// Failures after which a message is dead-lettered.
    pub maximum_failure_count: usize,
    /// Ignore windows applied to retried messages.
    pub ignore_schedule: IgnoreSchedule,
    /// Number of inbox workers.
    pub thread_count: usize,
    /// Idle sleeps for inbox workers, advanced on each empty poll.
    pub idle_durations_ms: Vec<u64>,
    /// Sleep between deferred-queue scans that are not yet due.
    pub deferred_poll_interval_ms: u64,
    /// Acknowledge messages that have no handler instead of dead-lettering them.
    pub remove_messages_not_handled: bool,
}

impl Default for BusConfiguration {
    fn default() -> Self {
        Self {
            maximum_failure_count: 5,
            ignore_schedule: IgnoreSchedule::default(),
            thread_count: 1,
            idle_durations_ms: vec![250, 500, 1000, 5000],
            deferred_poll_interval_ms: 1000,
            remove_messages_not_handled: false,
        }
    }
}

impl BusConfiguration {
    /// Parses a configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns a serialization error for malformed JSON and a configuration
    /// error if the values do not validate.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let configuration: Self = serde_json::from_str(json)?;
        configuration.validate()?;
        Ok(configuration)
    }

    /// Reads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read, otherwise as
    /// [`from_json_str`](Self::from_json_str).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Checks that the values are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.maximum_failure_count == 0 {
            return Err(ConfigurationError::Invalid(
                "maximum_failure_count must be at least 1".to_string(),
            ));
        }
        if self.thread_count == 0 {
            return Err(ConfigurationError::Invalid(
                "thread_count must be at least 1".to_string(),
            ));
        }
        if self.idle_durations_ms.is_empty() {
            return Err(ConfigurationError::Invalid(
                "idle_durations_ms must contain at least one duration".to_string(),
            ));
        }
        Ok(())
    }

    /// Idle sleeps as durations.
    #[must_use]
    pub fn idle_durations(&self) -> Vec<Duration> {
        self.idle_durations_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }

    /// The deferred poll interval as a duration.
    #[must_use]
    pub const fn deferred_poll_interval(&self) -> Duration {
        Duration::from_millis(self.deferred_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CourierError;
    use crate::policy::BackoffStrategy;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let configuration = BusConfiguration::default();

        assert_eq!(configuration.maximum_failure_count, 5);
        assert_eq!(configuration.thread_count, 1);
        assert_eq!(configuration.idle_durations_ms, vec![250, 500, 1000, 5000]);
        assert_eq!(configuration.deferred_poll_interval(), Duration::from_secs(1));
        assert!(!configuration.remove_messages_not_handled);
        assert!(configuration.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let configuration = BusConfiguration::from_json_str(
            r#"{ "maximum_failure_count": 3, "thread_count": 4 }"#,
        )
        .unwrap();

        assert_eq!(configuration.maximum_failure_count, 3);
        assert_eq!(configuration.thread_count, 4);
        assert_eq!(configuration.idle_durations_ms, vec![250, 500, 1000, 5000]);
    }

    #[test]
    fn test_backoff_schedule_from_json() {
        let configuration = BusConfiguration::from_json_str(
            r#"{
                "ignore_schedule": {
                    "kind": "backoff",
                    "base_delay_ms": 500,
                    "backoff_strategy": "linear"
                }
            }"#,
        )
        .unwrap();

        match configuration.ignore_schedule {
            IgnoreSchedule::Backoff(backoff) => {
                assert_eq!(backoff.base_delay_ms, 500);
                assert_eq!(backoff.backoff_strategy, BackoffStrategy::Linear);
            }
            other => panic!("unexpected schedule: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = BusConfiguration::from_json_str(r#"{ "maximum_failure_count": 0 }"#).unwrap_err();
        assert!(matches!(err, CourierError::Configuration(ConfigurationError::Invalid(_))));

        let err = BusConfiguration::from_json_str(r#"{ "thread_count": 0 }"#).unwrap_err();
        assert!(err.to_string().contains("thread_count"));

        let err = BusConfiguration::from_json_str(r#"{ "idle_durations_ms": [] }"#).unwrap_err();
        assert!(err.to_string().contains("idle_durations_ms"));
    }

    #[test]
    fn test_malformed_json_is_a_serialization_error() {
        let err = BusConfiguration::from_json_str("{ thread_count: ").unwrap_err();
        assert!(matches!(err, CourierError::Serialization(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "remove_messages_not_handled": true, "deferred_poll_interval_ms": 250 }}"#)
            .unwrap();

        let configuration = BusConfiguration::from_file(file.path()).unwrap();

        assert!(configuration.remove_messages_not_handled);
        assert_eq!(configuration.deferred_poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = BusConfiguration::from_file(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, CourierError::Io(_)));
    }
}
