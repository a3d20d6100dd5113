//! The pipeline engine.

use super::{PipelineException, PipelineState, PipelineStatus, Stage, StageFlow};
use crate::events::{EventSink, NoOpEventSink};
use crate::observability::SpanTimer;
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::json;
use std::any::Any;
use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Reacts to a stage failure.
///
/// Observers run in registration order while the state's status is
/// `ExceptionRaised`. An observer that deals with the failure calls
/// [`PipelineState::mark_exception_handled`]; later observers should check
/// [`PipelineState::is_exception_handled`] first.
#[async_trait]
pub trait ExceptionObserver: Send + Sync + Debug {
    /// Called once per raised exception.
    async fn on_exception(&self, pipeline: &str, state: &mut PipelineState);
}

/// An ordered list of stages with exception observers.
///
/// A pipeline is immutable once built and may be executed concurrently by
/// several workers, each with its own [`PipelineState`].
pub struct Pipeline {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
    observers: Vec<Arc<dyn ExceptionObserver>>,
    event_sink: Arc<dyn EventSink>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            observers: Vec::new(),
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Appends a stage.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Appends an exception observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ExceptionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Sets the sink that receives lifecycle events.
    #[must_use]
    pub fn with_event_sink(mut self, event_sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = event_sink;
        self
    }

    /// The pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Runs the stages against `state` and returns the final status.
    ///
    /// A stage that returns an error or panics raises a
    /// [`PipelineException`]. The observers are notified and the run is
    /// aborted whether or not one of them handled it.
    pub async fn execute(&self, state: &mut PipelineState) -> PipelineStatus {
        let timer = SpanTimer::start(&self.name);
        state.begin();
        self.event_sink
            .emit("pipeline.started", Some(json!({ "pipeline": self.name })))
            .await;

        for stage in &self.stages {
            if state.is_aborted() {
                break;
            }

            let outcome = AssertUnwindSafe(stage.execute(state))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(PipelineException::new(format!(
                        "Stage panicked: {}",
                        panic_message(panic.as_ref())
                    )))
                });

            match outcome {
                Ok(StageFlow::Continue) => {}
                Ok(StageFlow::Complete) => break,
                Err(exception) => {
                    self.raise(stage.name(), exception, state).await;
                    break;
                }
            }
        }

        let duration_ms = timer.finish();
        if state.is_aborted() {
            self.event_sink
                .emit(
                    "pipeline.aborted",
                    Some(json!({ "pipeline": self.name, "duration_ms": duration_ms })),
                )
                .await;
        } else {
            state.complete();
            debug!(pipeline = %self.name, duration_ms, "Pipeline completed");
            self.event_sink
                .emit(
                    "pipeline.completed",
                    Some(json!({ "pipeline": self.name, "duration_ms": duration_ms })),
                )
                .await;
        }

        state.status()
    }

    async fn raise(&self, stage: &str, exception: PipelineException, state: &mut PipelineState) {
        let exception = exception.with_stage(stage);
        warn!(
            pipeline = %self.name,
            stage,
            unrecoverable = exception.is_unrecoverable(),
            error = %exception,
            "Pipeline stage raised an exception"
        );
        self.event_sink
            .emit(
                "pipeline.exception",
                Some(json!({
                    "pipeline": self.name,
                    "stage": stage,
                    "description": exception.description(),
                })),
            )
            .await;
        state.raise(exception);

        for observer in &self.observers {
            let notified = AssertUnwindSafe(observer.on_exception(&self.name, state))
                .catch_unwind()
                .await;
            if let Err(panic) = notified {
                error!(
                    pipeline = %self.name,
                    observer = ?observer,
                    panic = panic_message(panic.as_ref()),
                    "Exception observer panicked"
                );
            }
        }

        if !state.is_exception_handled() {
            error!(pipeline = %self.name, stage, "Pipeline exception was not handled");
        }
        state.abort();
    }
}

impl Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .field("observers", &self.observers.len())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::pipeline::{FnStage, QueueSet};
    use crate::queue::MemoryQueue;
    use parking_lot::Mutex;

    fn state() -> PipelineState {
        PipelineState::new(
            &QueueSet::new(
                Arc::new(MemoryQueue::new("memory://work")),
                Arc::new(MemoryQueue::new("memory://error")),
            ),
            5,
        )
    }

    fn recording(name: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> impl Stage {
        FnStage::new(name, move |_: &mut PipelineState| {
            log.lock().push(name);
            Ok(StageFlow::Continue)
        })
    }

    #[derive(Debug, Default)]
    struct HandlingObserver {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ExceptionObserver for HandlingObserver {
        async fn on_exception(&self, _pipeline: &str, state: &mut PipelineState) {
            if state.is_exception_handled() {
                return;
            }
            if let Some(exception) = state.exception() {
                self.seen.lock().push(exception.description().to_string());
            }
            state.mark_exception_handled();
        }
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new("test")
            .with_stage(recording("first", log.clone()))
            .with_stage(recording("second", log.clone()))
            .with_stage(recording("third", log.clone()));

        let mut state = state();
        let status = pipeline.execute(&mut state).await;

        assert_eq!(status, PipelineStatus::Completed);
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
        assert_eq!(pipeline.stage_names(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_complete_skips_remaining_stages() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new("test")
            .with_stage(FnStage::new("stop", |_: &mut PipelineState| Ok(StageFlow::Complete)))
            .with_stage(recording("never", log.clone()));

        let status = pipeline.execute(&mut state()).await;

        assert_eq!(status, PipelineStatus::Completed);
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_exception_notifies_observers_and_aborts() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let observer = Arc::new(HandlingObserver::default());
        let sink = Arc::new(CollectingEventSink::new());
        let pipeline = Pipeline::new("test")
            .with_stage(FnStage::new("fail", |_: &mut PipelineState| Err(PipelineException::new("boom"))))
            .with_stage(recording("never", log.clone()))
            .with_observer(observer.clone())
            .with_event_sink(sink.clone());

        let mut state = state();
        let status = pipeline.execute(&mut state).await;

        assert_eq!(status, PipelineStatus::Aborted);
        assert!(state.is_exception_handled());
        assert_eq!(state.exception().and_then(PipelineException::stage), Some("fail"));
        assert_eq!(*observer.seen.lock(), vec!["boom".to_string()]);
        assert!(log.lock().is_empty());

        let names: Vec<String> = sink.events().into_iter().map(|(name, _)| name).collect();
        assert_eq!(
            names,
            vec!["pipeline.started", "pipeline.exception", "pipeline.aborted"]
        );
    }

    #[tokio::test]
    async fn test_unhandled_exception_still_aborts() {
        let pipeline = Pipeline::new("test")
            .with_stage(FnStage::new("fail", |_: &mut PipelineState| Err(PipelineException::new("boom"))));

        let mut state = state();
        let status = pipeline.execute(&mut state).await;

        assert_eq!(status, PipelineStatus::Aborted);
        assert!(!state.is_exception_handled());
    }

    #[tokio::test]
    async fn test_panicking_stage_becomes_exception() {
        let observer = Arc::new(HandlingObserver::default());
        let pipeline = Pipeline::new("test")
            .with_stage(FnStage::new("explode", |_: &mut PipelineState| panic!("kaboom")))
            .with_observer(observer.clone());

        let mut state = state();
        let status = pipeline.execute(&mut state).await;

        assert_eq!(status, PipelineStatus::Aborted);
        assert_eq!(*observer.seen.lock(), vec!["Stage panicked: kaboom".to_string()]);
    }

    #[tokio::test]
    async fn test_second_observer_sees_handled_exception() {
        let first = Arc::new(HandlingObserver::default());
        let second = Arc::new(HandlingObserver::default());
        let pipeline = Pipeline::new("test")
            .with_stage(FnStage::new("fail", |_: &mut PipelineState| Err(PipelineException::new("boom"))))
            .with_observer(first.clone())
            .with_observer(second.clone());

        pipeline.execute(&mut state()).await;

        assert_eq!(first.seen.lock().len(), 1);
        assert!(second.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_state_is_reset_between_runs() {
        let pipeline = Pipeline::new("test")
            .with_stage(FnStage::new("ok", |_: &mut PipelineState| Ok(StageFlow::Continue)));

        let mut state = state();
        state.raise(PipelineException::new("old"));
        let status = pipeline.execute(&mut state).await;

        assert_eq!(status, PipelineStatus::Completed);
        assert!(state.exception().is_none());
    }
}
