//! Per-run pipeline state.

use super::{PipelineException, PipelineStatus};
use crate::message::{ReceivedMessage, TransportMessage};
use crate::queue::Queue;
use std::fmt;
use std::sync::Arc;

/// The queues a bus processes.
#[derive(Clone)]
pub struct QueueSet {
    /// Where handlers' messages arrive.
    pub work: Arc<dyn Queue>,
    /// Where messages go once retries are exhausted.
    pub error: Arc<dyn Queue>,
    /// Where future-dated messages wait, if configured.
    pub deferred: Option<Arc<dyn Queue>>,
}

impl QueueSet {
    /// Creates a queue set without a deferred queue.
    #[must_use]
    pub fn new(work: Arc<dyn Queue>, error: Arc<dyn Queue>) -> Self {
        Self {
            work,
            error,
            deferred: None,
        }
    }

    /// Adds a deferred queue.
    #[must_use]
    pub fn with_deferred(mut self, deferred: Arc<dyn Queue>) -> Self {
        self.deferred = Some(deferred);
        self
    }
}

impl fmt::Debug for QueueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueSet")
            .field("work", &self.work.uri())
            .field("error", &self.error.uri())
            .field("deferred", &self.deferred.as_ref().map(|q| q.uri()))
            .finish()
    }
}

/// The mutable state of one pipeline run.
///
/// A state is owned by exactly one run at a time. The named slots are
/// filled in by the stages as the run progresses; the lifecycle fields are
/// driven by the engine and the exception observers.
pub struct PipelineState {
    /// The queue messages are received from.
    pub work_queue: Arc<dyn Queue>,
    /// The dead-letter queue.
    pub error_queue: Arc<dyn Queue>,
    /// The deferred queue, if configured.
    pub deferred_queue: Option<Arc<dyn Queue>>,
    /// The queue `received_message` was leased from.
    pub source_queue: Option<Arc<dyn Queue>>,
    /// The leased entry, until it is acknowledged or released.
    pub received_message: Option<ReceivedMessage>,
    /// The decoded envelope.
    pub transport_message: Option<TransportMessage>,
    /// Name of the handler that processed the message.
    pub handler_name: Option<String>,
    /// Set when a deferred message was moved back to the work queue.
    pub deferred_message_returned: bool,
    maximum_failure_count: usize,
    working: bool,
    status: PipelineStatus,
    exception: Option<PipelineException>,
    exception_handled: bool,
}

impl PipelineState {
    /// Creates an empty state for a new run.
    #[must_use]
    pub fn new(queues: &QueueSet, maximum_failure_count: usize) -> Self {
        Self {
            work_queue: Arc::clone(&queues.work),
            error_queue: Arc::clone(&queues.error),
            deferred_queue: queues.deferred.clone(),
            source_queue: None,
            received_message: None,
            transport_message: None,
            handler_name: None,
            deferred_message_returned: false,
            maximum_failure_count,
            working: false,
            status: PipelineStatus::Pending,
            exception: None,
            exception_handled: false,
        }
    }

    /// The queue that owns the current lease. Falls back to the work queue.
    #[must_use]
    pub fn source_queue(&self) -> Arc<dyn Queue> {
        self.source_queue
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.work_queue))
    }

    /// The configured retry threshold.
    #[must_use]
    pub const fn maximum_failure_count(&self) -> usize {
        self.maximum_failure_count
    }

    /// Marks that a message was received and real work happened.
    pub fn set_working(&mut self) {
        self.working = true;
    }

    /// Clears the working flag.
    pub fn reset_working(&mut self) {
        self.working = false;
    }

    /// Returns true if this run did real work.
    #[must_use]
    pub const fn is_working(&self) -> bool {
        self.working
    }

    /// The current lifecycle status.
    #[must_use]
    pub const fn status(&self) -> PipelineStatus {
        self.status
    }

    /// The exception raised during this run, if any.
    #[must_use]
    pub const fn exception(&self) -> Option<&PipelineException> {
        self.exception.as_ref()
    }

    /// Returns true once an observer has dealt with the exception.
    #[must_use]
    pub const fn is_exception_handled(&self) -> bool {
        self.exception_handled
    }

    /// Records that the current exception was dealt with.
    pub fn mark_exception_handled(&mut self) {
        self.exception_handled = true;
        self.status = PipelineStatus::ExceptionHandled;
    }

    /// Stops the run; no further stages execute.
    pub fn abort(&mut self) {
        self.status = PipelineStatus::Aborted;
    }

    /// Returns true if the run was aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.status == PipelineStatus::Aborted
    }

    pub(crate) fn begin(&mut self) {
        self.status = PipelineStatus::Running;
        self.exception = None;
        self.exception_handled = false;
    }

    pub(crate) fn raise(&mut self, exception: PipelineException) {
        self.exception = Some(exception);
        self.exception_handled = false;
        self.status = PipelineStatus::ExceptionRaised;
    }

    pub(crate) fn complete(&mut self) {
        if !self.is_aborted() {
            self.status = PipelineStatus::Completed;
        }
    }
}

impl fmt::Debug for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineState")
            .field("work_queue", &self.work_queue.uri())
            .field("source_queue", &self.source_queue.as_ref().map(|q| q.uri()))
            .field("received", &self.received_message.is_some())
            .field(
                "message_id",
                &self.transport_message.as_ref().map(|m| m.message_id),
            )
            .field("handler_name", &self.handler_name)
            .field("working", &self.working)
            .field("status", &self.status)
            .field("exception", &self.exception)
            .field("exception_handled", &self.exception_handled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;

    fn queues() -> QueueSet {
        QueueSet::new(
            Arc::new(MemoryQueue::new("memory://work")),
            Arc::new(MemoryQueue::new("memory://error")),
        )
    }

    #[test]
    fn test_new_state_is_pending() {
        let state = PipelineState::new(&queues(), 5);

        assert_eq!(state.status(), PipelineStatus::Pending);
        assert!(!state.is_working());
        assert!(state.exception().is_none());
        assert!(state.deferred_queue.is_none());
        assert_eq!(state.maximum_failure_count(), 5);
    }

    #[test]
    fn test_source_queue_defaults_to_work_queue() {
        let mut state = PipelineState::new(&queues(), 5);
        assert_eq!(state.source_queue().uri(), "memory://work");

        state.source_queue = Some(Arc::new(MemoryQueue::new("memory://deferred")));
        assert_eq!(state.source_queue().uri(), "memory://deferred");
    }

    #[test]
    fn test_exception_lifecycle() {
        let mut state = PipelineState::new(&queues(), 5);
        state.begin();
        state.raise(PipelineException::new("boom"));
        assert_eq!(state.status(), PipelineStatus::ExceptionRaised);
        assert!(!state.is_exception_handled());

        state.mark_exception_handled();
        assert_eq!(state.status(), PipelineStatus::ExceptionHandled);

        state.abort();
        state.complete();
        assert!(state.is_aborted());
        assert_eq!(state.exception().map(PipelineException::description), Some("boom"));
    }

    #[test]
    fn test_working_flag() {
        let mut state = PipelineState::new(&queues(), 5);
        state.set_working();
        assert!(state.is_working());
        state.reset_working();
        assert!(!state.is_working());
    }
}
