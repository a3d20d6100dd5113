//! Structured task group for the bus's worker tasks.

use super::CancellationToken;
use crate::errors::{CourierError, Result};
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// A group of named tasks sharing one cancellation token.
///
/// If any task fails, the remaining tasks are cancelled.
pub struct StructuredTaskGroup {
    cancel_token: Arc<CancellationToken>,
    handles: Mutex<Vec<(String, JoinHandle<Result<()>>)>>,
    first_error: RwLock<Option<String>>,
}

impl StructuredTaskGroup {
    /// Creates a new task group.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancel_token: Arc::new(CancellationToken::new()),
            handles: Mutex::new(Vec::new()),
            first_error: RwLock::new(None),
        }
    }

    /// Returns the cancellation token shared by the group's tasks.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel_token
    }

    /// Spawns a named task on the tokio runtime.
    pub fn spawn<F, Fut>(&self, name: impl Into<String>, task: F)
    where
        F: FnOnce(Arc<CancellationToken>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let token = Arc::clone(&self.cancel_token);
        debug!(task = %name, "Spawning task");
        let handle = tokio::spawn(async move { task(token).await });
        self.handles.lock().push((name, handle));
    }

    /// Cancels all tasks in the group.
    pub fn cancel_all(&self, reason: &str) {
        self.cancel_token.cancel(reason);
    }

    /// Waits for every spawned task to finish.
    ///
    /// # Errors
    ///
    /// Returns the first task failure (an error or a panic).
    pub async fn wait(&self) -> Result<()> {
        let handles = std::mem::take(&mut *self.handles.lock());

        for (name, handle) in handles {
            let failure = match handle.await {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(format!("Task '{name}' failed: {err}")),
                Err(join_error) => Some(format!("Task '{name}' join error: {join_error}")),
            };

            if let Some(message) = failure {
                error!(task = %name, error = %message, "Task failed");
                let mut first_error = self.first_error.write();
                if first_error.is_none() {
                    self.cancel_token.cancel(message.clone());
                    *first_error = Some(message);
                }
            }
        }

        match self.first_error.read().clone() {
            Some(message) => Err(CourierError::Internal(message)),
            None => Ok(()),
        }
    }

    /// Returns the number of tasks not yet waited on.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.handles.lock().len()
    }
}

impl Default for StructuredTaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StructuredTaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredTaskGroup")
            .field("task_count", &self.task_count())
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_task_group_success() {
        let group = StructuredTaskGroup::new();

        group.spawn("inbox-1", |_token| async { Ok(()) });
        group.spawn("inbox-2", |_token| async { Ok(()) });
        assert_eq!(group.task_count(), 2);

        assert!(group.wait().await.is_ok());
        assert_eq!(group.task_count(), 0);
    }

    #[tokio::test]
    async fn test_task_failure_cancels_group() {
        let group = StructuredTaskGroup::new();

        group.spawn("ok", |_token| async { Ok(()) });
        group.spawn("broken", |_token| async {
            Err(CourierError::Internal("queue offline".to_string()))
        });

        let err = group.wait().await.unwrap_err();
        assert!(err.to_string().contains("broken"));
        assert!(group.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_task_respects_cancellation() {
        let group = StructuredTaskGroup::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let counter_clone = counter.clone();
        group.spawn("worker", move |token| async move {
            while !token.sleep_or_cancelled(Duration::from_millis(10)).await {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        group.cancel_all("shutdown");
        group.wait().await.unwrap();

        assert!(counter.load(Ordering::SeqCst) < 100);
    }
}
