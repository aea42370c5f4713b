//! Task scheduler for event handlers.
//!
//! Every handler runs as its own tracked task. Delayed steps wait through
//! [`TaskScheduler::sleep`], which returns early once shutdown has begun, so
//! no timer can fire against a closed account session.

use std::{future::Future, time::Duration};

use tokio::time::sleep;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

#[derive(Clone, Debug, Default)]
pub struct TaskScheduler {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fut` as an independent task.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(fut);
    }

    /// Wait `dur`. Returns `false` if shutdown cancelled the wait.
    pub async fn sleep(&self, dur: Duration) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        if dur.is_zero() {
            return true;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = sleep(dur) => true,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token cancelled when shutdown starts.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel pending waits. Sleeping tasks wake up and skip their next step.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Give in-flight tasks up to `grace` to finish. Returns the number of
    /// tasks still running when the grace period ended.
    pub async fn drain(&self, grace: Duration) -> usize {
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            return self.tracker.len();
        }
        0
    }

    /// [`cancel`](Self::cancel) followed by [`drain`](Self::drain).
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.cancel();
        self.drain(grace).await
    }
}
