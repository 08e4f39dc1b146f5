//! Security audit trail
//!
//! Records why a lock or wipe happened. Every entry is also emitted as a
//! structured `tracing` event carrying an `event` field.

use crate::delegate::DatabaseLockReason;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{info, warn};

/// Entries kept before the oldest are dropped
pub const DEFAULT_AUDIT_CAPACITY: usize = 256;

/// Kind of security-relevant event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityEventKind {
    /// App lock screen shown
    AppLockEngaged,
    /// Databases were locked
    DatabaseLockEngaged {
        /// Why
        reason: DatabaseLockReason,
        /// Whether cached master keys were forgotten
        keys_erased: bool,
    },
    /// Device reboot detected (or assumed)
    RebootDetected {
        /// Fail-safe assumption rather than an observed boot time change
        assumed: bool,
    },
    /// Secure storage failed and a conservative fallback was taken
    StorageFallback {
        /// What was being done
        context: String,
    },
    /// Wrong passcode reported by the host
    FailedAttempt,
    /// All local data erased
    DataErased {
        /// Items that could not be removed
        failures: usize,
    },
    /// One resign-active reaction was skipped
    SuppressionConsumed,
}

/// One audit entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityEvent {
    /// When it happened
    pub at: DateTime<Utc>,
    /// What happened
    pub kind: SecurityEventKind,
}

/// Bounded, shareable audit log
#[derive(Debug, Clone)]
pub struct SecurityAuditLog {
    inner: Arc<Mutex<VecDeque<SecurityEvent>>>,
    capacity: usize,
}

impl SecurityAuditLog {
    /// Create a log keeping at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1_024)))),
            capacity: capacity.max(1),
        }
    }

    /// Record an app lock
    pub fn app_lock_engaged(&self, at: DateTime<Utc>) {
        info!(event = "app_lock_engaged", "App lock engaged");
        self.push(at, SecurityEventKind::AppLockEngaged);
    }

    /// Record a database lock
    pub fn database_lock_engaged(&self, at: DateTime<Utc>, reason: DatabaseLockReason, keys_erased: bool) {
        info!(
            event = "database_lock_engaged",
            reason = reason.as_str(),
            keys_erased = %keys_erased,
            "Database lock engaged"
        );
        self.push(at, SecurityEventKind::DatabaseLockEngaged { reason, keys_erased });
    }

    /// Record a detected or assumed reboot
    pub fn reboot_detected(&self, at: DateTime<Utc>, assumed: bool) {
        info!(event = "reboot_detected", assumed = %assumed, "Device reboot detected");
        self.push(at, SecurityEventKind::RebootDetected { assumed });
    }

    /// Record a conservative fallback after a storage failure
    pub fn storage_fallback(&self, at: DateTime<Utc>, context: &str) {
        warn!(event = "storage_fallback", context = %context, "Secure storage fallback");
        self.push(
            at,
            SecurityEventKind::StorageFallback {
                context: context.to_string(),
            },
        );
    }

    /// Record a failed passcode
    pub fn failed_attempt(&self, at: DateTime<Utc>) {
        info!(event = "failed_passcode", "Failed passcode attempt");
        self.push(at, SecurityEventKind::FailedAttempt);
    }

    /// Record a completed wipe
    pub fn data_erased(&self, at: DateTime<Utc>, failures: usize) {
        warn!(event = "data_erased", failures = %failures, "All local data erased");
        self.push(at, SecurityEventKind::DataErased { failures });
    }

    /// Record a skipped resign-active reaction
    pub fn suppression_consumed(&self, at: DateTime<Utc>) {
        info!(event = "minimization_ignored", "Resign-active reaction suppressed");
        self.push(at, SecurityEventKind::SuppressionConsumed);
    }

    /// Copy of the current entries, oldest first
    pub fn snapshot(&self) -> Vec<SecurityEvent> {
        self.inner.lock().iter().cloned().collect()
    }

    /// Number of entries held
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    fn push(&self, at: DateTime<Utc>, kind: SecurityEventKind) {
        let mut events = self.inner.lock();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(SecurityEvent { at, kind });
    }
}

impl Default for SecurityAuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}
