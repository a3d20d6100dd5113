//! Retry/dead-letter decisions for failed messages.

mod schedule;

pub use schedule::{BackoffConfig, BackoffStrategy, IgnoreSchedule, JitterStrategy};

use crate::message::TransportMessage;
use crate::pipeline::PipelineException;
use std::time::Duration;

/// What to do with a message whose handling failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureAction {
    /// Put the message back on the work queue.
    pub retry: bool,
    /// How long the retried message stays invisible.
    pub ignore_window: Duration,
}

impl FailureAction {
    /// Retry after the given window.
    #[must_use]
    pub const fn retry(ignore_window: Duration) -> Self {
        Self {
            retry: true,
            ignore_window,
        }
    }

    /// Move the message to the error queue.
    #[must_use]
    pub const fn dead_letter() -> Self {
        Self {
            retry: false,
            ignore_window: Duration::ZERO,
        }
    }
}

/// Decides between retry and dead-letter.
///
/// Implementations must be free of side effects: the decision depends only on
/// the message's failure history and the exception being handled.
#[cfg_attr(test, mockall::automock)]
pub trait FailurePolicy: Send + Sync {
    /// Evaluates a failure. `message` still carries only its prior failures.
    fn evaluate(&self, message: &TransportMessage, exception: &PipelineException) -> FailureAction;
}

/// Retries while the prior failure count is below a maximum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultFailurePolicy {
    maximum_failure_count: usize,
    schedule: IgnoreSchedule,
}

impl DefaultFailurePolicy {
    /// Creates a policy.
    #[must_use]
    pub fn new(maximum_failure_count: usize, schedule: IgnoreSchedule) -> Self {
        Self {
            maximum_failure_count,
            schedule,
        }
    }

    /// Creates a policy from the bus configuration.
    #[must_use]
    pub fn from_configuration(configuration: &crate::config::BusConfiguration) -> Self {
        Self::new(
            configuration.maximum_failure_count,
            configuration.ignore_schedule.clone(),
        )
    }

    /// Returns the maximum number of failures before dead-lettering.
    #[must_use]
    pub const fn maximum_failure_count(&self) -> usize {
        self.maximum_failure_count
    }
}

impl Default for DefaultFailurePolicy {
    fn default() -> Self {
        Self::new(5, IgnoreSchedule::default())
    }
}

impl FailurePolicy for DefaultFailurePolicy {
    fn evaluate(&self, message: &TransportMessage, _exception: &PipelineException) -> FailureAction {
        let failures = message.failure_count();
        if failures < self.maximum_failure_count {
            FailureAction::retry(self.schedule.window_for(failures))
        } else {
            FailureAction::dead_letter()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::now_utc;

    fn message_with_failures(count: usize) -> TransportMessage {
        let mut message = TransportMessage::new("OrderPlaced", Vec::new());
        for i in 0..count {
            message.register_failure(format!("failure {i}"), now_utc());
        }
        message
    }

    fn policy() -> DefaultFailurePolicy {
        DefaultFailurePolicy::new(
            3,
            IgnoreSchedule::fixed(&[Duration::from_secs(10), Duration::from_secs(60)]),
        )
    }

    #[test]
    fn test_retries_below_threshold() {
        let exception = PipelineException::new("timeout");

        let action = policy().evaluate(&message_with_failures(0), &exception);
        assert_eq!(action, FailureAction::retry(Duration::from_secs(10)));

        let action = policy().evaluate(&message_with_failures(2), &exception);
        assert_eq!(action, FailureAction::retry(Duration::from_secs(60)));
    }

    #[test]
    fn test_dead_letters_at_threshold() {
        let exception = PipelineException::new("timeout");

        let action = policy().evaluate(&message_with_failures(3), &exception);
        assert_eq!(action, FailureAction::dead_letter());
    }

    #[test]
    fn test_evaluate_has_no_side_effects() {
        let message = message_with_failures(1);
        let before = message.clone();

        let _ = policy().evaluate(&message, &PipelineException::new("timeout"));

        assert_eq!(message, before);
    }

    #[test]
    fn test_default_policy() {
        assert_eq!(DefaultFailurePolicy::default().maximum_failure_count(), 5);
    }
}
