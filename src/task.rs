//! Per-context task timing and cancellation state.
//!
//! A [`TaskState`] is the only part of a context the watchdog can see. Its
//! fields are atomics so the watchdog may cancel a task while the owning
//! call path is blocked inside the engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Sentinel start time meaning "no task running".
pub const IDLE: u64 = 0;

/// Cooperative cancellation signal shared between a context and the watchdog.
///
/// Engines must poll [`is_cancelled`](Self::is_cancelled) at bounded
/// intervals while running a function and unwind with an error once it
/// returns `true`.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the task observing this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

/// Monotonic nanosecond clock shared by contexts and the watchdog.
///
/// Readings are wall-clock elapsed time since the clock was created, offset
/// by one so that a reading is never equal to [`IDLE`]. `Instant` keeps
/// nanoseconds, so comparing two readings never rounds an interval down.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    /// Create a clock whose origin is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Nanoseconds since the origin, plus one.
    pub fn now(&self) -> u64 {
        let elapsed = self.origin.elapsed().as_nanos();
        u64::try_from(elapsed).unwrap_or(u64::MAX - 1) + 1
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Timing and cancellation state of one context.
#[derive(Debug, Default)]
pub struct TaskState {
    started_at: AtomicU64,
    token: CancellationToken,
}

impl TaskState {
    /// Create an idle task state.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cancellation token engines observe for this context.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Start time as a [`Clock`] reading, or `None` when idle.
    pub fn started_at(&self) -> Option<u64> {
        match self.started_at.load(Ordering::SeqCst) {
            IDLE => None,
            at => Some(at),
        }
    }

    /// Whether an engine call is in progress.
    pub fn is_running(&self) -> bool {
        self.started_at().is_some()
    }

    /// Whether the current (or last) task was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the task if it started at least `timeout` before `now`.
    ///
    /// Returns `true` if the token was cancelled by this call.
    pub fn cancel_if_overdue(&self, now: u64, timeout: Duration) -> bool {
        let Some(started_at) = self.started_at() else {
            return false;
        };
        let elapsed = Duration::from_nanos(now.saturating_sub(started_at));
        if elapsed < timeout || self.token.is_cancelled() {
            return false;
        }
        self.token.cancel();
        // The owning thread may have finished and started another task
        // between the load above and the cancel; that task is not overdue.
        if self.started_at.load(Ordering::SeqCst) != started_at {
            self.token.reset();
            return false;
        }
        true
    }

    /// Mark the task as running and clear any stale cancellation.
    ///
    /// The returned guard marks the task idle again when dropped, so the
    /// start time is reset on success, on error, and on unwind alike.
    pub(crate) fn begin(&self, clock: &Clock) -> RunningGuard<'_> {
        self.token.reset();
        self.started_at.store(clock.now(), Ordering::SeqCst);
        RunningGuard { state: self }
    }
}

/// Resets a [`TaskState`] to idle when dropped.
pub(crate) struct RunningGuard<'a> {
    state: &'a TaskState,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.state.started_at.store(IDLE, Ordering::SeqCst);
    }
}
