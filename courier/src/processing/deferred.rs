//! The deferred message processor.

use crate::cancellation::CancellationToken;
use crate::pipeline::{DeferralListener, Pipeline, PipelineState, PipelineStatus, QueueSet};
use crate::utils::{format_iso8601, Clock, Timestamp, EARLIEST, LATEST};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};
use uuid::Uuid;

/// Scan position over the deferred queue.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DeferredCheckpoint {
    /// No scan starts before this instant.
    next_process_at: Timestamp,
    /// Earliest ignore-till seen during the current scan.
    ignore_till_floor: Timestamp,
    /// The first not-yet-due message of the current scan.
    checkpoint_message_id: Option<Uuid>,
    /// Not-yet-due messages rotated during the current scan. Seeing one
    /// twice ends the scan even if the checkpoint left the queue.
    rotated: HashSet<Uuid>,
}

impl Default for DeferredCheckpoint {
    fn default() -> Self {
        Self {
            next_process_at: EARLIEST,
            ignore_till_floor: LATEST,
            checkpoint_message_id: None,
            rotated: HashSet::new(),
        }
    }
}

impl DeferredCheckpoint {
    fn commit(&mut self) -> Timestamp {
        self.next_process_at = self.ignore_till_floor;
        self.ignore_till_floor = LATEST;
        self.checkpoint_message_id = None;
        self.rotated.clear();
        self.next_process_at
    }
}

/// What one tick of the processor did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredTick {
    /// Nothing is due before the given instant.
    Waiting(Timestamp),
    /// A not-yet-due message became the scan checkpoint.
    Checkpointed(Uuid),
    /// A not-yet-due message was rotated during a scan.
    Scanning(Uuid),
    /// A due message was moved to the work queue.
    Returned(Uuid),
    /// A scan finished; no scan starts before the given instant.
    Committed(Timestamp),
    /// The deferred pipeline failed; the checkpoint is untouched.
    Aborted,
}

/// Returns deferred messages to the work queue once they are due.
///
/// Messages wait on the deferred queue in arbitrary order. The processor
/// walks the queue one message per tick, rotating those that are not yet
/// due and remembering the first of them as a checkpoint. When the
/// checkpoint comes around again (or the queue is empty) the scan is
/// committed: the processor sleeps until the earliest ignore-till it saw.
/// A scan whose checkpoint was taken off the queue by someone else commits
/// as soon as any rotated message comes around a second time.
///
/// [`message_deferred`](Self::message_deferred) wakes it earlier when a new
/// message is parked.
pub struct DeferredMessageProcessor {
    pipeline: Pipeline,
    queues: QueueSet,
    maximum_failure_count: usize,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    checkpoint: Mutex<DeferredCheckpoint>,
}

impl DeferredMessageProcessor {
    /// Creates a processor running `pipeline` against `queues`.
    #[must_use]
    pub fn new(
        pipeline: Pipeline,
        queues: QueueSet,
        maximum_failure_count: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pipeline,
            queues,
            maximum_failure_count,
            clock,
            poll_interval: Duration::from_secs(1),
            checkpoint: Mutex::new(DeferredCheckpoint::default()),
        }
    }

    /// Sets the longest sleep between ticks that have nothing to do.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// The instant before which no scan starts.
    #[must_use]
    pub fn next_process_at(&self) -> Timestamp {
        self.checkpoint.lock().next_process_at
    }

    /// Lowers the next scan time (and the running floor) to `ignore_till`.
    pub fn message_deferred(&self, ignore_till: Timestamp) {
        let mut checkpoint = self.checkpoint.lock();
        if ignore_till < checkpoint.next_process_at {
            checkpoint.next_process_at = ignore_till;
        }
        if ignore_till < checkpoint.ignore_till_floor {
            checkpoint.ignore_till_floor = ignore_till;
        }
        trace!(
            ignore_till = %format_iso8601(&ignore_till),
            next_process_at = %format_iso8601(&checkpoint.next_process_at),
            "Deferred message registered"
        );
    }

    /// Runs one step of the scan.
    pub async fn tick(&self) -> DeferredTick {
        let next_process_at = self.next_process_at();
        if self.clock.now() < next_process_at {
            return DeferredTick::Waiting(next_process_at);
        }

        let mut state = PipelineState::new(&self.queues, self.maximum_failure_count);
        if self.pipeline.execute(&mut state).await == PipelineStatus::Aborted {
            return DeferredTick::Aborted;
        }

        let candidate = state
            .transport_message
            .as_ref()
            .filter(|_| state.is_working())
            .map(|message| (message.message_id, message.ignore_till));

        let mut checkpoint = self.checkpoint.lock();
        let Some((message_id, ignore_till)) = candidate else {
            let next = checkpoint.commit();
            debug!(next_process_at = %format_iso8601(&next), "Deferred queue is empty");
            return DeferredTick::Committed(next);
        };

        if state.deferred_message_returned {
            if checkpoint.checkpoint_message_id == Some(message_id) {
                checkpoint.checkpoint_message_id = None;
            }
            return DeferredTick::Returned(message_id);
        }

        if ignore_till < checkpoint.ignore_till_floor {
            checkpoint.ignore_till_floor = ignore_till;
        }

        let current = checkpoint.checkpoint_message_id;
        match current {
            Some(id) if id == message_id || !checkpoint.rotated.insert(message_id) => {
                let next = checkpoint.commit();
                debug!(next_process_at = %format_iso8601(&next), "Deferred scan complete");
                DeferredTick::Committed(next)
            }
            Some(_) => DeferredTick::Scanning(message_id),
            None => {
                checkpoint.checkpoint_message_id = Some(message_id);
                checkpoint.rotated.insert(message_id);
                DeferredTick::Checkpointed(message_id)
            }
        }
    }

    /// Ticks until cancelled.
    ///
    /// Sleeps between ticks only when there is nothing to do; cancellation
    /// interrupts the sleep but never a pipeline run.
    pub async fn run(&self, cancel: &CancellationToken) {
        info!("Deferred message processor started");
        while !cancel.is_cancelled() {
            let wait = match self.tick().await {
                DeferredTick::Waiting(until) => (until - self.clock.now())
                    .to_std()
                    .map_or(self.poll_interval, |remaining| remaining.min(self.poll_interval)),
                DeferredTick::Aborted => self.poll_interval,
                DeferredTick::Checkpointed(_)
                | DeferredTick::Scanning(_)
                | DeferredTick::Returned(_)
                | DeferredTick::Committed(_) => {
                    tokio::task::yield_now().await;
                    continue;
                }
            };
            if cancel.sleep_or_cancelled(wait).await {
                break;
            }
        }
        info!("Deferred message processor stopped");
    }
}

impl DeferralListener for DeferredMessageProcessor {
    fn message_deferred(&self, ignore_till: Timestamp) {
        Self::message_deferred(self, ignore_till);
    }
}

impl std::fmt::Debug for DeferredMessageProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredMessageProcessor")
            .field("pipeline", &self.pipeline.name())
            .field("queues", &self.queues)
            .field("checkpoint", &*self.checkpoint.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::deferred_pipeline;
    use crate::queue::Queue;
    use crate::serialization::{JsonSerializer, Serializer};
    use crate::testing::{message, TestBus};
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;

    fn processor(bus: &TestBus) -> DeferredMessageProcessor {
        DeferredMessageProcessor::new(
            deferred_pipeline(&bus.services()),
            bus.queues(),
            bus.maximum_failure_count,
            bus.clock.clone(),
        )
    }

    /// Ticks until the processor commits a scan or has nothing to do.
    async fn settle(processor: &DeferredMessageProcessor) -> Vec<DeferredTick> {
        let mut ticks = Vec::new();
        for _ in 0..64 {
            let tick = processor.tick().await;
            ticks.push(tick);
            if matches!(tick, DeferredTick::Committed(_) | DeferredTick::Waiting(_)) {
                return ticks;
            }
        }
        panic!("processor did not settle: {ticks:?}");
    }

    #[tokio::test]
    async fn test_empty_queue_commits_latest() {
        let bus = TestBus::new();
        let processor = processor(&bus);

        assert_eq!(processor.tick().await, DeferredTick::Committed(LATEST));
        assert_eq!(processor.tick().await, DeferredTick::Waiting(LATEST));
    }

    #[tokio::test]
    async fn test_due_times_are_visited_in_order() {
        let bus = TestBus::new();
        let start = bus.clock.now();
        let t1 = start + TimeDelta::seconds(10);
        let t2 = start + TimeDelta::seconds(20);
        let t3 = start + TimeDelta::seconds(30);
        let a = message("OrderPlaced").with_ignore_till(t1);
        let b = message("OrderPlaced").with_ignore_till(t2);
        let c = message("OrderPlaced").with_ignore_till(t3);
        for deferred in [&b, &a, &c] {
            bus.put(bus.deferred.as_ref(), deferred).await;
        }
        let processor = processor(&bus);

        let ticks = settle(&processor).await;
        assert_eq!(
            ticks,
            vec![
                DeferredTick::Checkpointed(b.message_id),
                DeferredTick::Scanning(a.message_id),
                DeferredTick::Scanning(c.message_id),
                DeferredTick::Committed(t1),
            ]
        );
        assert_eq!(processor.tick().await, DeferredTick::Waiting(t1));
        assert!(bus.contents(&bus.work).is_empty());

        bus.clock.set(t1);
        settle(&processor).await;
        assert_eq!(processor.next_process_at(), t2);
        assert_eq!(bus.contents(&bus.work), vec![a.clone()]);

        bus.clock.set(t2);
        settle(&processor).await;
        assert_eq!(processor.next_process_at(), t3);
        assert_eq!(bus.contents(&bus.work), vec![a.clone(), b.clone()]);

        bus.clock.set(t3);
        settle(&processor).await;
        assert_eq!(processor.next_process_at(), LATEST);
        assert_eq!(bus.contents(&bus.work), vec![a, b, c]);
        assert!(bus.contents(&bus.deferred).is_empty());
    }

    #[tokio::test]
    async fn test_returning_the_checkpoint_clears_it() {
        let bus = TestBus::new();
        let start = bus.clock.now();
        let early = message("OrderPlaced").with_ignore_till(start + TimeDelta::seconds(5));
        let late = message("OrderPlaced").with_ignore_till(start + TimeDelta::seconds(50));
        bus.put(bus.deferred.as_ref(), &early).await;
        bus.put(bus.deferred.as_ref(), &late).await;
        let processor = processor(&bus);

        assert_eq!(processor.tick().await, DeferredTick::Checkpointed(early.message_id));
        bus.clock.advance(Duration::from_secs(5));
        assert_eq!(processor.tick().await, DeferredTick::Scanning(late.message_id));
        assert_eq!(processor.tick().await, DeferredTick::Returned(early.message_id));
        assert_eq!(processor.tick().await, DeferredTick::Checkpointed(late.message_id));
        assert_eq!(
            processor.tick().await,
            DeferredTick::Committed(start + TimeDelta::seconds(5))
        );
        assert_eq!(bus.contents(&bus.work), vec![early]);
    }

    #[tokio::test]
    async fn test_scan_ends_when_checkpoint_is_removed_elsewhere() {
        let bus = TestBus::new();
        let start = bus.clock.now();
        let a = message("OrderPlaced").with_ignore_till(start + TimeDelta::minutes(30));
        let b = message("OrderPlaced").with_ignore_till(start + TimeDelta::minutes(10));
        let c = message("OrderPlaced").with_ignore_till(start + TimeDelta::minutes(20));
        for deferred in [&a, &b, &c] {
            bus.put(bus.deferred.as_ref(), deferred).await;
        }
        let processor = processor(&bus);
        assert_eq!(processor.tick().await, DeferredTick::Checkpointed(a.message_id));

        // Another consumer takes the checkpoint message; b and c keep their order.
        let serializer = JsonSerializer::new();
        let mut kept = Vec::new();
        while let Some(received) = bus.deferred.dequeue().await.unwrap() {
            let id = serializer.deserialize(received.stream()).unwrap().message_id;
            kept.push((id, received));
        }
        for (id, received) in kept {
            let (_, token) = received.into_parts();
            if id == a.message_id {
                bus.deferred.acknowledge(token).await.unwrap();
            } else {
                bus.deferred.release(token).await.unwrap();
            }
        }
        assert_eq!(bus.deferred.message_ids(), vec![b.message_id, c.message_id]);

        let ticks = settle(&processor).await;
        assert_eq!(
            ticks,
            vec![
                DeferredTick::Scanning(b.message_id),
                DeferredTick::Scanning(c.message_id),
                DeferredTick::Committed(start + TimeDelta::minutes(10)),
            ]
        );
        assert_eq!(
            processor.tick().await,
            DeferredTick::Waiting(start + TimeDelta::minutes(10))
        );
    }

    #[tokio::test]
    async fn test_undecodable_entry_does_not_block_due_messages() {
        let bus = TestBus::new();
        bus.deferred
            .enqueue(Uuid::new_v4(), b"not a message".to_vec())
            .await
            .unwrap();
        let order = message("OrderPlaced").with_ignore_till(bus.clock.now());
        bus.put(bus.deferred.as_ref(), &order).await;
        let processor = processor(&bus);

        assert_eq!(processor.tick().await, DeferredTick::Aborted);
        assert_eq!(processor.tick().await, DeferredTick::Returned(order.message_id));

        assert_eq!(bus.contents(&bus.work), vec![order]);
        assert_eq!(bus.deferred.available_count(), 1);
        assert_eq!(bus.deferred.leased_count(), 0);
    }

    #[tokio::test]
    async fn test_message_deferred_lowers_next_process_at() {
        let bus = TestBus::new();
        let processor = processor(&bus);
        let far = bus.clock.now() + TimeDelta::hours(1);
        bus.put(
            bus.deferred.as_ref(),
            &message("OrderPlaced").with_ignore_till(far),
        )
        .await;
        settle(&processor).await;
        assert_eq!(processor.next_process_at(), far);

        let soon = bus.clock.now() + TimeDelta::seconds(5);
        processor.message_deferred(soon);
        assert_eq!(processor.next_process_at(), soon);

        processor.message_deferred(far);
        assert_eq!(processor.next_process_at(), soon);
    }

    #[tokio::test]
    async fn test_message_deferred_during_scan_lowers_commit() {
        let bus = TestBus::new();
        let start = bus.clock.now();
        let first = message("OrderPlaced").with_ignore_till(start + TimeDelta::minutes(10));
        let second = message("OrderPlaced").with_ignore_till(start + TimeDelta::minutes(20));
        bus.put(bus.deferred.as_ref(), &first).await;
        bus.put(bus.deferred.as_ref(), &second).await;
        let processor = processor(&bus);

        assert_eq!(processor.tick().await, DeferredTick::Checkpointed(first.message_id));
        processor.message_deferred(start + TimeDelta::minutes(1));

        let ticks = settle(&processor).await;
        assert_eq!(
            ticks.last(),
            Some(&DeferredTick::Committed(start + TimeDelta::minutes(1)))
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let bus = TestBus::new();
        let processor = Arc::new(processor(&bus).with_poll_interval(Duration::from_millis(5)));
        let cancel = Arc::new(CancellationToken::new());

        let handle = tokio::spawn({
            let processor = Arc::clone(&processor);
            let cancel = Arc::clone(&cancel);
            async move { processor.run(&cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel("shutdown");

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(processor.next_process_at(), LATEST);
    }
}
