//! Host-side boundary the engine drives
//!
//! The engine never owns UI or open databases. It asks the host about the
//! current lock state and instructs it through this trait. The engine holds
//! the delegate weakly; once the host drops it, every engine operation is a
//! silent no-op.

/// Commands and queries the host application implements
pub trait WatchdogDelegate: Send + Sync {
    /// Whether the app lock screen is currently shown
    fn is_app_lock_visible(&self) -> bool;

    /// Show the app lock screen
    fn show_app_lock(&self);

    /// Hide the app lock screen
    fn hide_app_lock(&self);

    /// Whether the privacy cover is currently shown
    fn is_app_cover_visible(&self) -> bool;

    /// Show the privacy cover (hides content in the app switcher)
    fn show_app_cover(&self);

    /// Hide the privacy cover
    fn hide_app_cover(&self);

    /// Lock and close whichever databases are open
    fn must_close_database(&self, animate: bool);

    /// Whether any database is currently open
    fn has_open_database(&self) -> bool {
        true
    }

    /// All local data was erased; the host should return to its empty state
    fn did_erase_all_data(&self) {}
}

/// Cache of derived database master keys
pub trait MasterKeyCache: Send + Sync {
    /// Forget every cached master key
    fn erase_all_master_keys(&self);
}

/// Why a database lock was engaged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseLockReason {
    /// Idle or minimization timeout
    Timeout,
    /// Reboot, screen lock, or another OS-level event
    SystemEvent,
    /// Wrong app passcode entered
    FailedPasscode,
    /// The user asked to lock
    UserRequest,
}

impl DatabaseLockReason {
    /// Whether cached master keys must be forgotten for this reason.
    ///
    /// Timeouts only forget keys when the policy says so; everything else always does.
    pub fn must_erase_keys(&self, lock_databases_on_timeout: bool) -> bool {
        match self {
            DatabaseLockReason::Timeout => lock_databases_on_timeout,
            _ => true,
        }
    }

    /// Short name for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseLockReason::Timeout => "timeout",
            DatabaseLockReason::SystemEvent => "system_event",
            DatabaseLockReason::FailedPasscode => "failed_passcode",
            DatabaseLockReason::UserRequest => "user_request",
        }
    }
}
