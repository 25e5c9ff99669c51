//! Cancellable one-shot settle timer

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// A single pending delayed task.
///
/// Arming replaces whatever was armed before. The task body should check
/// the session generation it was armed with, since a cancel can race the
/// moment the delay elapses.
#[derive(Default)]
pub struct SettleTimer {
    handle: Mutex<Option<(u64, JoinHandle<()>)>>,
}

impl SettleTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`
    pub fn arm<F>(&self, generation: u64, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });

        if let Some((_, previous)) = self.handle.lock().replace((generation, handle)) {
            if !previous.is_finished() {
                previous.abort();
            }
        }
    }

    /// Cancel the pending task, if any. Safe to call repeatedly.
    pub fn cancel(&self) -> bool {
        match self.handle.lock().take() {
            Some((_, handle)) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    /// Whether a task is armed or still running
    pub fn is_armed(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|(_, h)| !h.is_finished())
            .unwrap_or(false)
    }

    /// Generation the current task was armed with
    pub fn generation(&self) -> Option<u64> {
        self.handle.lock().as_ref().map(|(g, _)| *g)
    }
}

impl Drop for SettleTimer {
    fn drop(&mut self) {
        if let Some((_, handle)) = self.handle.lock().take() {
            handle.abort();
        }
    }
}
