//! A minimal cancellation handle, since spec.md's "caller cancellation
//! handle" has no single idiomatic stdlib equivalent. Composing it with a
//! per-attempt deadline is done with `tokio::select!` at the call site
//! rather than baked into this type.

use std::sync::Arc;
use tokio::sync::Notify;

/// Cooperative cancellation shared between a caller and the attempt loop
/// that's currently honoring it. Cloning shares the same underlying signal.
#[derive(Clone, Default)]
pub struct Cancellation {
    notify: Arc<Notify>,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled
            .store(true, std::sync::atomic::Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called. Resolves immediately if it
    /// already was.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_before_wait_resolves_immediately() {
        let c = Cancellation::new();
        c.cancel();
        tokio::time::timeout(Duration::from_millis(50), c.cancelled())
            .await
            .expect("cancelled() should return immediately once already cancelled");
    }

    #[tokio::test]
    async fn cancel_during_wait_wakes_the_waiter() {
        let c = Cancellation::new();
        let waiter = c.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());

        c.cancel();
        tokio::time::timeout(Duration::from_millis(50), handle)
            .await
            .expect("waiter should wake up once cancelled")
            .expect("waiter task should not panic");
    }

    #[tokio::test]
    async fn is_cancelled_reflects_state_without_consuming_the_notification() {
        let c = Cancellation::new();
        assert!(!c.is_cancelled());
        c.cancel();
        assert!(c.is_cancelled());
        c.cancelled().await; // must not hang
    }
}
