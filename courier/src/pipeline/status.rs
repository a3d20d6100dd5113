//! Pipeline run status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle status of one pipeline run.
///
/// A run moves `Running -> Completed`, or
/// `Running -> ExceptionRaised -> ExceptionHandled -> Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// The run has not started.
    #[default]
    Pending,
    /// Stages are executing.
    Running,
    /// Every stage ran, or a stage ended the run early without error.
    Completed,
    /// A stage failed and observers are being notified.
    ExceptionRaised,
    /// An observer dealt with the failure.
    ExceptionHandled,
    /// The run stopped after a failure.
    Aborted,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::ExceptionRaised => write!(f, "exception_raised"),
            Self::ExceptionHandled => write!(f, "exception_handled"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

impl PipelineStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// Returns true if the run finished without a failure.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}
