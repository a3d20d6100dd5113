//! Ignore-window schedules with configurable backoff and jitter.
//!
//! The window decides how long a retried message stays invisible before it is
//! processed again.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for computed windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// window = base * 2^failures
    #[default]
    Exponential,
    /// window = base * (failures + 1)
    Linear,
    /// window = base (constant)
    Constant,
}

/// Jitter strategy to spread retries of many messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to window
    Full,
    /// Half fixed, half random
    Equal,
}

/// Configuration for computed windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Base window in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum window in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    pub jitter_strategy: JitterStrategy,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 300_000,
            backoff_strategy: BackoffStrategy::Exponential,
            jitter_strategy: JitterStrategy::None,
        }
    }
}

impl BackoffConfig {
    /// Creates a new backoff config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base delay.
    #[must_use]
    pub const fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub const fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub const fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub const fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }

    /// Calculates the window after `failures` prior failures.
    #[must_use]
    pub fn window_for(&self, failures: usize) -> Duration {
        let base = self.base_delay_ms;
        let max = self.max_delay_ms;
        let exponent = u32::try_from(failures).unwrap_or(u32::MAX);

        let delay = match self.backoff_strategy {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(exponent)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(exponent).saturating_add(1)),
            BackoffStrategy::Constant => base,
        }
        .min(max);

        let jittered = match self.jitter_strategy {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

/// How ignore windows are chosen for retried messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IgnoreSchedule {
    /// Explicit windows; the n-th failure uses the n-th entry and the last
    /// entry repeats.
    Fixed {
        /// Windows in milliseconds.
        durations_ms: Vec<u64>,
    },
    /// Computed windows.
    Backoff(BackoffConfig),
}

impl Default for IgnoreSchedule {
    fn default() -> Self {
        Self::Fixed {
            durations_ms: vec![30_000, 60_000, 300_000],
        }
    }
}

impl IgnoreSchedule {
    /// Creates a fixed schedule.
    #[must_use]
    pub fn fixed(durations: &[Duration]) -> Self {
        Self::Fixed {
            durations_ms: durations
                .iter()
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                .collect(),
        }
    }

    /// Returns the window after `failures` prior failures.
    #[must_use]
    pub fn window_for(&self, failures: usize) -> Duration {
        match self {
            Self::Fixed { durations_ms } => durations_ms
                .get(failures)
                .or_else(|| durations_ms.last())
                .map_or(Duration::ZERO, |ms| Duration::from_millis(*ms)),
            Self::Backoff(config) => config.window_for(failures),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_defaults() {
        assert_eq!(BackoffStrategy::default(), BackoffStrategy::Exponential);
        assert_eq!(JitterStrategy::default(), JitterStrategy::None);

        let config = BackoffConfig::default();
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 300_000);
    }

    #[test]
    fn test_exponential_windows() {
        let config = BackoffConfig::new().with_base_delay_ms(100);

        assert_eq!(config.window_for(0), Duration::from_millis(100));
        assert_eq!(config.window_for(1), Duration::from_millis(200));
        assert_eq!(config.window_for(2), Duration::from_millis(400));
    }

    #[test]
    fn test_linear_and_constant_windows() {
        let linear = BackoffConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Linear);
        assert_eq!(linear.window_for(2), Duration::from_millis(300));

        let constant = BackoffConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Constant);
        assert_eq!(constant.window_for(5), Duration::from_millis(100));
    }

    #[test]
    fn test_window_capped_at_max() {
        let config = BackoffConfig::new()
            .with_base_delay_ms(1000)
            .with_max_delay_ms(5000);

        assert_eq!(config.window_for(10), Duration::from_millis(5000));
        assert_eq!(config.window_for(usize::MAX), Duration::from_millis(5000));
    }

    #[test]
    fn test_full_jitter_bounded() {
        let config = BackoffConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Constant)
            .with_jitter(JitterStrategy::Full);

        for _ in 0..10 {
            assert!(config.window_for(0) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_equal_jitter_bounded() {
        let config = BackoffConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Constant)
            .with_jitter(JitterStrategy::Equal);

        for _ in 0..10 {
            let window = config.window_for(0);
            assert!(window >= Duration::from_millis(50));
            assert!(window <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_fixed_schedule_repeats_last_entry() {
        let schedule = IgnoreSchedule::fixed(&[Duration::from_secs(1), Duration::from_secs(5)]);

        assert_eq!(schedule.window_for(0), Duration::from_secs(1));
        assert_eq!(schedule.window_for(1), Duration::from_secs(5));
        assert_eq!(schedule.window_for(7), Duration::from_secs(5));
    }

    #[test]
    fn test_empty_fixed_schedule_is_immediate() {
        let schedule = IgnoreSchedule::Fixed {
            durations_ms: Vec::new(),
        };
        assert_eq!(schedule.window_for(3), Duration::ZERO);
    }

    #[test]
    fn test_schedule_deserialize() {
        let schedule: IgnoreSchedule = serde_json::from_str(
            r#"{"kind": "backoff", "base_delay_ms": 250, "backoff_strategy": "linear"}"#,
        )
        .unwrap();

        assert_eq!(
            schedule,
            IgnoreSchedule::Backoff(
                BackoffConfig::new()
                    .with_base_delay_ms(250)
                    .with_backoff(BackoffStrategy::Linear)
            )
        );
    }
}
