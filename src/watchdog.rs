//! Background watchdog enforcing the global task timeout.
//!
//! The watchdog is one thread that repeatedly scans the [`ContextRegistry`]
//! and cancels every task that has been running for at least the current
//! timeout, then waits one timeout interval. A task is therefore never
//! cancelled before it has run for `T`, and is detected no later than `2T`
//! after it started.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::logging::{debug, error, info, warn};
use crate::registry::ContextRegistry;
use crate::task::Clock;

/// Default task timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// The shortest interval the watchdog will sleep between scans.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Process-wide task timeout, readable and writable from any thread.
///
/// Updates are eventually visible: a scan already in progress keeps using
/// the value it read.
#[derive(Debug)]
pub struct TaskTimeout {
    millis: AtomicU64,
}

impl TaskTimeout {
    /// Create a timeout of `millis` milliseconds.
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    /// Current timeout.
    pub fn get(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::Relaxed))
    }

    /// Current timeout in milliseconds.
    pub fn millis(&self) -> u64 {
        self.millis.load(Ordering::Relaxed)
    }

    /// Replace the timeout. Takes effect on the next scan.
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::Relaxed);
    }
}

impl Default for TaskTimeout {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_MS)
    }
}

/// Handle to the running watchdog thread.
///
/// Dropping the handle (or calling [`stop`](Self::stop)) signals the thread
/// and joins it.
#[derive(Debug)]
pub struct Watchdog {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Spawn the watchdog thread.
    ///
    /// `interrupt` is invoked after every scan that cancelled at least one
    /// task, outside the registry lock.
    pub fn start(
        name: &str,
        registry: Arc<ContextRegistry>,
        timeout: Arc<TaskTimeout>,
        clock: Clock,
        interrupt: impl Fn() + Send + 'static,
    ) -> Result<Self> {
        let (shutdown, signal) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(timeout_ms = timeout.millis(), "watchdog started");
                loop {
                    let timeout_ms = timeout.millis();
                    let interval = Duration::from_millis(timeout_ms);
                    let now = clock.now();
                    let cancelled = registry.cancel_overdue(now, interval);
                    if !cancelled.is_empty() {
                        warn!(
                            contexts = ?cancelled,
                            timeout_ms,
                            "cancelled tasks that exceeded timeout"
                        );
                        interrupt();
                    }

                    match signal.recv_timeout(interval.max(MIN_POLL_INTERVAL)) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("watchdog stopped");
            })
            .map_err(Error::WatchdogStart)?;

        info!(thread = name, "watchdog thread spawned");
        Ok(Self {
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }

    /// Signal the thread to stop and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    /// Whether the watchdog thread is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn shutdown_and_join(&mut self) {
        // Dropping the sender wakes the thread with `Disconnected`.
        drop(self.shutdown.take());
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("watchdog thread panicked");
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}
