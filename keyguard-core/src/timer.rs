//! Single-shot, cancellable, rearmable lock timers

use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::trace;

/// Cancellation token that can be cloned and shared across tasks.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    /// Create a new token in the non-cancelled state.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Returns `true` if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation and wake any waiters.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Await until cancellation is requested.
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent cancel is not missed
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct TimerState {
    generation: u64,
    token: Option<CancelToken>,
}

/// One lock domain's idle timer.
///
/// Arming invalidates the previous schedule. The fire decision and
/// [`LockTimer::cancel`] are serialized, so a callback never starts after
/// `cancel` (or a re-arm) has returned.
pub struct LockTimer {
    name: &'static str,
    state: Arc<Mutex<TimerState>>,
}

impl LockTimer {
    /// Create a disarmed timer; `name` only appears in logs
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Arc::new(Mutex::new(TimerState::default())),
        }
    }

    /// Schedule `on_fire` after `delay`, replacing any pending schedule
    pub fn arm<F>(&self, handle: &Handle, delay: Duration, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let token = CancelToken::new();
        let generation = {
            let mut state = self.state.lock();
            if let Some(previous) = state.token.take() {
                previous.cancel();
            }
            state.generation = state.generation.wrapping_add(1);
            state.token = Some(token.clone());
            state.generation
        };

        trace!("{} timer armed for {:?}", self.name, delay);
        let deadline = tokio::time::Instant::now() + delay;
        let state = Arc::clone(&self.state);
        let name = self.name;
        handle.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }

            {
                let mut state = state.lock();
                if state.generation != generation || token.is_cancelled() {
                    return;
                }
                state.token = None;
            }

            trace!("{} timer fired", name);
            on_fire();
        });
    }

    /// Disarm. A pending callback will not run.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        if let Some(token) = state.token.take() {
            token.cancel();
            trace!("{} timer cancelled", self.name);
        }
        state.generation = state.generation.wrapping_add(1);
    }

    /// Whether a callback is pending
    pub fn is_armed(&self) -> bool {
        self.state.lock().token.is_some()
    }
}

impl Drop for LockTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
