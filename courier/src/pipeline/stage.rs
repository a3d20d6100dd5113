//! Stage trait and the exception value a failing stage produces.

use super::PipelineState;
use crate::errors::{CourierError, QueueError};
use async_trait::async_trait;
use std::fmt::Debug;
use thiserror::Error;

/// Tells the engine what to do after a stage succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageFlow {
    /// Run the next stage.
    Continue,
    /// End the run successfully without running later stages.
    Complete,
}

/// A failure raised by a stage.
///
/// Exceptions never escape [`Pipeline::execute`](super::Pipeline::execute);
/// they are stored on the run state and handed to the exception observers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{description}")]
pub struct PipelineException {
    stage: Option<String>,
    description: String,
    unrecoverable: bool,
}

impl PipelineException {
    /// A failure that may succeed on retry.
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            stage: None,
            description: description.into(),
            unrecoverable: false,
        }
    }

    /// A failure that retrying cannot fix.
    #[must_use]
    pub fn unrecoverable(description: impl Into<String>) -> Self {
        Self {
            unrecoverable: true,
            ..Self::new(description)
        }
    }

    /// Wraps any error, keeping its source chain in the description.
    #[must_use]
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut description = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            description.push_str(": ");
            description.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::new(description)
    }

    /// Records the stage that raised the exception.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// The failure description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The stage that raised the exception, once the engine has recorded it.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        self.stage.as_deref()
    }

    /// Returns true if the message should go straight to the error queue.
    #[must_use]
    pub const fn is_unrecoverable(&self) -> bool {
        self.unrecoverable
    }
}

impl From<QueueError> for PipelineException {
    fn from(err: QueueError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<CourierError> for PipelineException {
    fn from(err: CourierError) -> Self {
        match err {
            CourierError::Precondition(_) | CourierError::Configuration(_) => {
                Self::unrecoverable(err.to_string())
            }
            other => Self::from_error(&other),
        }
    }
}

/// One step of a pipeline.
///
/// Stages run strictly in the order they were added and mutate the run
/// state they are given. Returning `Err` ends the run and hands the
/// exception to the pipeline's observers.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Executes the stage against the current run.
    async fn execute(&self, state: &mut PipelineState) -> Result<StageFlow, PipelineException>;
}

/// A stage backed by a synchronous closure.
pub struct FnStage<F>
where
    F: Fn(&mut PipelineState) -> Result<StageFlow, PipelineException> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&mut PipelineState) -> Result<StageFlow, PipelineException> + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&mut PipelineState) -> Result<StageFlow, PipelineException> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&mut PipelineState) -> Result<StageFlow, PipelineException> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, state: &mut PipelineState) -> Result<StageFlow, PipelineException> {
        (self.func)(state)
    }
}
