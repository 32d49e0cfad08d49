//! Cancellable delayed tasks.
//!
//! Transports schedule one expiry per in-flight message; almost all of them
//! are cancelled when the reply wins the race. The scheduler is a cloneable
//! handle over the outstanding task set: cancelled and completed tasks
//! unregister themselves, and `shutdown` aborts whatever is left.
//!
//! A scheduler may be shared: the owner that created it shuts it down,
//! components it was injected into must not.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::AbortHandle;
use tracing::trace;

/// Schedules futures to run once after a delay.
///
/// Must be used from within a tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

#[derive(Debug, Default)]
struct SchedulerInner {
    tasks: DashMap<u64, AbortHandle>,
    next_id: AtomicU64,
    shutdown: AtomicBool,
}

impl Scheduler {
    /// Create a new scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once `delay` has elapsed, unless cancelled first.
    ///
    /// After shutdown this returns an inert handle and the task never runs.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> ScheduledTask
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return ScheduledTask {
                id: 0,
                abort: None,
                tasks: Weak::new(),
            };
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
            inner.tasks.remove(&id);
        });
        let abort = handle.abort_handle();
        self.inner.tasks.insert(id, abort.clone());
        trace!(task = id, ?delay, "scheduled delayed task");

        ScheduledTask {
            id,
            abort: Some(abort),
            tasks: Arc::downgrade(&self.inner),
        }
    }

    /// Abort every outstanding task and refuse new ones.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        let handles: Vec<AbortHandle> = self
            .inner
            .tasks
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.inner.tasks.clear();
        for handle in &handles {
            handle.abort();
        }
        trace!(aborted = handles.len(), "scheduler shut down");
    }

    /// Whether [`Scheduler::shutdown`] has been called.
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Number of tasks currently outstanding.
    pub fn pending(&self) -> usize {
        self.inner.tasks.len()
    }
}

/// Handle to a task scheduled via [`Scheduler::schedule`].
#[derive(Debug)]
pub struct ScheduledTask {
    id: u64,
    abort: Option<AbortHandle>,
    tasks: Weak<SchedulerInner>,
}

impl ScheduledTask {
    /// Cancel the task. A no-op if it already ran or was cancelled.
    pub fn cancel(&self) {
        if let Some(abort) = &self.abort {
            abort.abort();
            if let Some(inner) = self.tasks.upgrade() {
                inner.tasks.remove(&self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        scheduler.schedule(Duration::from_millis(100), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        let task = scheduler.schedule(Duration::from_millis(50), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        task.cancel();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_outstanding_and_refuses_new() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        scheduler.schedule(Duration::from_millis(50), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.shutdown();

        let counter = Arc::clone(&fired);
        scheduler.schedule(Duration::from_millis(10), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(scheduler.is_shutdown());
    }
}
