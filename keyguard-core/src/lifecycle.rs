//! Lifecycle event bus
//!
//! The host publishes app and screen transitions; the watchdog subscribes.

use tokio::sync::broadcast;
use tracing::debug;

/// Buffered events per subscriber before the slowest one starts lagging
pub const DEFAULT_BUS_CAPACITY: usize = 64;

/// App, window and screen transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// App came to the foreground
    DidBecomeActive,
    /// App is about to leave the foreground
    WillResignActive,
    /// Device screen locked (desktop)
    ScreenLocked,
    /// Device screen unlocked (desktop)
    ScreenUnlocked,
    /// Main window gained focus (desktop)
    WindowDidBecomeKey,
    /// Main window lost focus (desktop)
    WindowDidResignKey,
}

/// Broadcast channel of [`LifecycleEvent`]s
#[derive(Debug, Clone)]
pub struct LifecycleBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Returns the number of subscribers that received it.
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("No lifecycle subscribers for {:?}", event);
                0
            }
        }
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Current number of subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LifecycleBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}
