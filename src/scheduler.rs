//! Scheduler (C8). Grounded on `original_source/jobs/jobs.go`'s
//! `jobWrapper` (a `sync.Mutex.TryLock()` single-flight guard around a named
//! job) and spec.md §4.8.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A unit of periodic work. `run` takes `&self` since the scheduler only
/// ever calls it through a single-flight guard; implementors do not need
/// their own internal locking for overlap.
pub trait Job: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn run(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

struct JobWrapper<J: Job> {
    job: J,
    running: AtomicBool,
    exec_id: AtomicU64,
}

impl<J: Job> JobWrapper<J> {
    fn new(job: J) -> Self {
        Self {
            job,
            running: AtomicBool::new(false),
            exec_id: AtomicU64::new(0),
        }
    }

    /// Fires the job unless a previous firing is still running, in which
    /// case this firing is skipped (not queued).
    async fn fire(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!(job = self.job.name(), "skipping trigger, job already running");
            return;
        }

        let id = self.exec_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(job = self.job.name(), exec_id = id, "triggered");
        self.job.run().await;
        tracing::debug!(job = self.job.name(), exec_id = id, "completed");

        self.running.store(false, Ordering::Release);
    }
}

/// Drives one job at a fixed interval for the life of the process, skipping
/// overlapping firings. `stop` cancels the interval loop and awaits the
/// in-flight firing, if any (graceful shutdown, spec.md §4.8 guarantee 2).
pub struct Scheduler {
    handle: Option<JoinHandle<()>>,
    cancel: Arc<tokio::sync::Notify>,
}

impl Scheduler {
    pub fn spawn<J: Job>(job: J, interval: Duration) -> Self {
        let wrapper = Arc::new(JobWrapper::new(job));
        let cancel = Arc::new(tokio::sync::Notify::new());
        let cancel_rx = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        wrapper.fire().await;
                    }
                    _ = cancel_rx.notified() => {
                        break;
                    }
                }
            }
        });

        Self {
            handle: Some(handle),
            cancel,
        }
    }

    /// Signals the loop to stop firing new ticks and waits for it (and any
    /// in-flight job) to finish.
    pub async fn stop(&mut self) {
        self.cancel.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}
