//! Tracker for fire-and-forget work.
//!
//! Session initialization, scheduled restarts and version checks run in the
//! background. Their failures are logged here, and shutdown can wait for
//! whatever is still in flight.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub struct BackgroundTracker {
    tasks: Mutex<JoinSet<()>>,
    /// Approximate count of pending tasks (atomic for lock-free reads).
    pending: Arc<AtomicUsize>,
}

/// Holds one slot of the pending count; released when the task finishes,
/// panics or is aborted.
struct PendingSlot(Arc<AtomicUsize>);

impl PendingSlot {
    fn acquire(pending: &Arc<AtomicUsize>) -> Self {
        pending.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(pending))
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl BackgroundTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(JoinSet::new()),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Spawn a tracked task. An `Err` outcome is logged under `name`.
    pub fn spawn<F, E>(&self, name: &'static str, future: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let slot = PendingSlot::acquire(&self.pending);

        let mut tasks = self.tasks.lock();
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                warn!(error = %e, "background task panicked");
            }
        }
        tasks.spawn(async move {
            let _slot = slot;
            match future.await {
                Ok(()) => debug!(task = name, "background task finished"),
                Err(e) => warn!(task = name, error = %e, "background task failed"),
            }
        });
    }

    /// Wait for every task spawned so far.
    pub async fn drain_all(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "background task panicked");
            }
        }
    }

    /// Returns `true` if everything finished before `timeout`. Tasks still
    /// running at the deadline are aborted.
    pub async fn drain_with_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.drain_all()).await.is_ok()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }
}

impl Default for BackgroundTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BackgroundTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTracker")
            .field("pending_count", &self.pending_count())
            .finish()
    }
}
