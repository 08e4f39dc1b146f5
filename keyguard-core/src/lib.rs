//! Session-security engine for Keyguard
//!
//! Decides when to lock the app, when to lock open databases, and when to
//! erase all local data after repeated failed unlock attempts.
//!
//! ## Components
//!
//! - **Secure Counter Store**: durable storage for the boot timestamp and failed-attempt count
//! - **Reboot Detector**: compares the OS boot time against the stored one
//! - **Self-Destruct Counter**: counts failed passcodes and wipes local data at the threshold
//! - **Watchdog**: activity clock and lock timers, driven by app lifecycle events
//!
//! The engine never verifies passcodes itself; the host reports outcomes
//! and the engine reacts through the [`WatchdogDelegate`] boundary.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod clock;
pub mod delegate;
pub mod eraser;
pub mod error;
pub mod lifecycle;
pub mod policy;
pub mod reboot;
pub mod self_destruct;
pub mod settings;
pub mod store;
pub mod timer;
pub mod watchdog;

pub use audit::{SecurityAuditLog, SecurityEvent, SecurityEventKind, DEFAULT_AUDIT_CAPACITY};
pub use clock::{BootTimeSource, Clock, ManualBootTime, ManualClock, SystemBootTime, SystemClock};
pub use delegate::{DatabaseLockReason, MasterKeyCache, WatchdogDelegate};
pub use eraser::{DataEraser, ErasureFailure, ErasureReport, FileSystemEraser};
pub use error::{Error, Result};
pub use lifecycle::{LifecycleBus, LifecycleEvent, DEFAULT_BUS_CAPACITY};
pub use policy::{
    AppLockTimeout, DatabaseLockTimeout, FailedAttemptLimit, LockPolicy, RawLockPolicy,
    TriggerMode,
};
pub use reboot::{RebootCheck, RebootDetector, BOOT_TIME_TOLERANCE};
pub use self_destruct::SelfDestructCounter;
pub use settings::{MemorySettings, SettingsProvider};
pub use store::{MemoryCounterStore, SecureCounterStore};
pub use timer::{CancelToken, LockTimer};
pub use watchdog::{FailedPasscodeOutcome, Watchdog, WatchdogConfig, COVER_HIDE_DELAY};
