use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use crate::queue::WorkQueue;
use crate::worker::{WorkerJob, WorkerResult};

/// Counts live workers so shutdown can wait for them.
#[derive(Default)]
pub struct WorkerCounter {
    live: Mutex<usize>,
    idle: Condvar,
}

/// Decrements the live count when the worker ends.
pub struct WorkerGuard<'a> {
    counter: &'a WorkerCounter,
}

impl Drop for WorkerGuard<'_> {
    fn drop(&mut self) {
        let mut live = self.counter.live.lock();
        *live = live.saturating_sub(1);
        if *live == 0 {
            self.counter.idle.notify_all();
        }
    }
}

impl WorkerCounter {
    pub fn enter(&self) -> WorkerGuard<'_> {
        self.register();
        self.adopt()
    }

    /// Counts a worker before its thread exists.
    pub fn register(&self) {
        *self.live.lock() += 1;
    }

    /// Guard for a worker counted earlier with `register`.
    pub fn adopt(&self) -> WorkerGuard<'_> {
        WorkerGuard { counter: self }
    }

    pub fn live(&self) -> usize {
        *self.live.lock()
    }

    /// Waits until no worker is live. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut live = self.live.lock();
        while *live > 0 {
            if self.idle.wait_until(&mut live, deadline).timed_out() {
                return *live == 0;
            }
        }
        true
    }
}

/// Process-wide scheduler plumbing: the job and result queues plus the
/// worker count. Created once at startup and handed to every component.
#[derive(Default)]
pub struct SchedulerRuntime {
    pub jobs: WorkQueue<WorkerJob>,
    pub results: WorkQueue<WorkerResult>,
    pub workers: WorkerCounter,
}

impl SchedulerRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for live workers, then drops whatever is left in both queues.
    /// Returns false when workers were still running at the deadline.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let idle = self.workers.wait_idle(timeout);
        if !idle {
            warn!(
                "{} workers still running after {:?}",
                self.workers.live(),
                timeout
            );
        }
        let jobs = self.jobs.expire_all(Duration::ZERO);
        let results = self.results.expire_all(Duration::ZERO);
        info!(
            "scheduler stopped, dropped {} queued jobs and {} results",
            jobs, results
        );
        idle
    }
}
