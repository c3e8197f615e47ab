//! A thin indirection over `tokio`'s task/timer primitives.
//!
//! Every background task this crate spawns (cache cleanup, EFM monitors, the
//! cluster topology monitor, failover races) goes through this module
//! instead of calling `tokio::spawn`/`tokio::time::sleep` directly. That
//! gives a single place to make sleeps interruptible by a cancellation
//! signal, which spec.md §5 requires of every retry loop.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Spawns `future` on the runtime, returning a handle that can be awaited or
/// aborted.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(future)
}

/// Runs `future` to completion or until `timeout` elapses, whichever comes
/// first.
pub async fn timeout<F: Future>(duration: Duration, future: F) -> Result<F::Output, Elapsed> {
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| Elapsed)
}

/// Error returned by [`timeout`] when the duration elapses before the future
/// completes.
#[derive(Debug, Clone, Copy)]
pub struct Elapsed;

/// A cancellation signal that can be cloned and observed from many tasks.
///
/// Built on a [`watch`] channel rather than a plain `AtomicBool` so that
/// `cancelled()` can be awaited: a task blocked in a retry sleep wakes
/// immediately when the signal fires instead of waiting out the rest of its
/// sleep.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    /// Signals every clone of this token that the associated task(s) should
    /// stop. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called on any clone
    /// of this token.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }

    /// Sleeps for `duration`, waking early if the token is cancelled first.
    /// Returns `true` if the sleep ran to completion, `false` if it was cut
    /// short by cancellation.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn sleep_runs_to_completion_without_cancel() {
        let token = CancellationToken::new();
        let completed = token.sleep(Duration::from_millis(10)).await;
        assert!(completed);
    }

    #[tokio::test]
    async fn sleep_is_interrupted_by_cancel() {
        let token = CancellationToken::new();
        let token2 = token.clone();
        spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            token2.cancel();
        });
        let completed = token.sleep(Duration::from_secs(5)).await;
        assert!(!completed);
    }

    #[tokio::test]
    async fn timeout_reports_elapsed() {
        let result = timeout(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;
        assert!(result.is_err());
    }
}
