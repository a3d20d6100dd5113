//! Cancellation token for cooperative shutdown.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// A token for cooperative cancellation.
///
/// Workers check it between units of work and race it against their idle
/// sleeps. Cancellation is idempotent; the first reason is kept.
#[derive(Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
    notify: Notify,
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation and wakes every waiter.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *self.reason.write() = Some(reason.into());
            self.notify.notify_waiters();
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Completes once cancellation has been requested.
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Sleeps for `duration` unless cancelled first.
    ///
    /// Returns true if the sleep was cut short by cancellation.
    pub async fn sleep_or_cancelled(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.cancelled() => true,
            () = tokio::time::sleep(duration) => self.is_cancelled(),
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_token_default_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn test_token_cancel_idempotent() {
        let token = CancellationToken::new();
        token.cancel("shutdown");
        token.cancel("second");

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some("shutdown".to_string()));
    }

    #[test]
    fn test_cancelled_wakes_pending_waiter() {
        let token = CancellationToken::new();
        let mut waiter = task::spawn(token.cancelled());
        assert_pending!(waiter.poll());

        token.cancel("stop");

        assert!(waiter.is_woken());
        assert_ready!(waiter.poll());
    }

    #[test]
    fn test_cancelled_ready_after_cancel() {
        let token = CancellationToken::new();
        token.cancel("stop");

        let mut waiter = task::spawn(token.cancelled());
        assert_ready!(waiter.poll());
    }

    #[tokio::test]
    async fn test_sleep_or_cancelled() {
        let token = Arc::new(CancellationToken::new());
        assert!(!token.sleep_or_cancelled(Duration::from_millis(5)).await);

        let canceller = Arc::clone(&token);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel("stop");
        });
        assert!(token.sleep_or_cancelled(Duration::from_secs(30)).await);
    }
}
