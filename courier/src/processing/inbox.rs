//! Inbox workers.

use crate::cancellation::CancellationToken;
use crate::pipeline::{Pipeline, PipelineState, PipelineStatus, QueueSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, trace};

const FALLBACK_IDLE: Duration = Duration::from_secs(1);

/// Idle sleeps that grow with each empty poll and reset on work.
#[derive(Debug, Clone)]
pub struct IdleBackoff {
    durations: Vec<Duration>,
    index: usize,
}

impl IdleBackoff {
    /// Creates a backoff over `durations`. An empty list sleeps one second.
    #[must_use]
    pub fn new(durations: Vec<Duration>) -> Self {
        Self {
            durations,
            index: 0,
        }
    }

    /// Returns the next sleep and advances; the last entry repeats.
    pub fn next_sleep(&mut self) -> Duration {
        let Some(&sleep) = self.durations.get(self.index) else {
            return self.durations.last().copied().unwrap_or(FALLBACK_IDLE);
        };
        if self.index + 1 < self.durations.len() {
            self.index += 1;
        }
        sleep
    }

    /// Starts over from the first sleep.
    pub fn reset(&mut self) {
        self.index = 0;
    }
}

/// Runs the receive pipeline in a loop for one worker.
#[derive(Debug, Clone)]
pub struct InboxProcessor {
    pipeline: Arc<Pipeline>,
    queues: QueueSet,
    maximum_failure_count: usize,
    idle_durations: Vec<Duration>,
}

impl InboxProcessor {
    /// Creates a processor sharing `pipeline` with the other workers.
    #[must_use]
    pub fn new(
        pipeline: Arc<Pipeline>,
        queues: QueueSet,
        maximum_failure_count: usize,
        idle_durations: Vec<Duration>,
    ) -> Self {
        Self {
            pipeline,
            queues,
            maximum_failure_count,
            idle_durations,
        }
    }

    /// Runs the pipeline once and returns the finished run state.
    pub async fn process_once(&self) -> PipelineState {
        let mut state = PipelineState::new(&self.queues, self.maximum_failure_count);
        self.pipeline.execute(&mut state).await;
        state
    }

    /// Processes messages until cancelled, sleeping while the queue is idle.
    pub async fn run(&self, worker: usize, cancel: &CancellationToken) {
        info!(worker, queue = self.queues.work.uri(), "Inbox worker started");
        let mut idle = IdleBackoff::new(self.idle_durations.clone());

        while !cancel.is_cancelled() {
            let state = self.process_once().await;

            // An undecodable entry goes back to its queue; count the run as
            // idle so a queue holding only such entries is not spun on.
            let undecodable =
                state.status() == PipelineStatus::Aborted && state.transport_message.is_none();

            if state.is_working() && !undecodable {
                idle.reset();
                tokio::task::yield_now().await;
                continue;
            }

            let sleep = idle.next_sleep();
            trace!(worker, sleep = ?sleep, "Inbox idle");
            if cancel.sleep_or_cancelled(sleep).await {
                break;
            }
        }

        info!(worker, "Inbox worker stopped");
    }
}
