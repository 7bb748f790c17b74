//! A named task that runs once after activity settles.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

struct Scheduled {
    handle: JoinHandle<()>,
    started: Arc<AtomicBool>,
}

/// Rescheduling replaces the pending run instead of adding a second one.
///
/// A run whose timer already fired is left to finish.
pub struct DebouncedTask {
    name: String,
    delay: Duration,
    scheduled: Mutex<Option<Scheduled>>,
}

impl DebouncedTask {
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            scheduled: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `task` after the configured delay.
    pub fn schedule<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.schedule_in(self.delay, task);
    }

    /// Run `task` after `delay`, replacing any pending run.
    pub fn schedule_in<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(task = %self.name, "No async runtime, dropping scheduled run");
            return;
        };

        let started = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&started);
        let name = self.name.clone();

        let mut scheduled = self.scheduled.lock();
        if let Some(previous) = scheduled.take() {
            if !previous.started.load(Ordering::SeqCst) {
                previous.handle.abort();
                tracing::trace!(task = %name, "Rescheduled");
            }
        }

        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            flag.store(true, Ordering::SeqCst);
            tracing::trace!(task = %name, "Running");
            task.await;
        });
        *scheduled = Some(Scheduled { handle, started });
    }

    /// Drop the pending run, if its timer has not fired yet.
    pub fn cancel(&self) {
        if let Some(previous) = self.scheduled.lock().take() {
            if !previous.started.load(Ordering::SeqCst) {
                previous.handle.abort();
            }
        }
    }

    /// Whether a run is waiting for its timer.
    pub fn is_pending(&self) -> bool {
        self.scheduled
            .lock()
            .as_ref()
            .is_some_and(|s| !s.started.load(Ordering::SeqCst) && !s.handle.is_finished())
    }
}

impl Drop for DebouncedTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for DebouncedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebouncedTask")
            .field("name", &self.name)
            .field("delay", &self.delay)
            .field("pending", &self.is_pending())
            .finish()
    }
}
