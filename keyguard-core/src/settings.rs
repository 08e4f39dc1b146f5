//! Settings provider contract
//!
//! The engine reads the lock policy fresh on every evaluation and persists
//! the most recent user activity through the provider, so idle timeouts
//! survive process termination.

use crate::policy::LockPolicy;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Read-only policy access plus the persisted activity timestamp
pub trait SettingsProvider: Send + Sync {
    /// Current lock policy
    fn lock_policy(&self) -> LockPolicy;

    /// Time of the most recent confirmed user activity, if ever recorded
    fn recent_activity(&self) -> Option<DateTime<Utc>>;

    /// Record user activity
    fn set_recent_activity(&self, at: DateTime<Utc>);
}

/// In-memory settings
#[derive(Debug, Default)]
pub struct MemorySettings {
    policy: RwLock<LockPolicy>,
    recent_activity: RwLock<Option<DateTime<Utc>>>,
}

impl MemorySettings {
    /// Create with a policy
    pub fn new(policy: LockPolicy) -> Self {
        Self {
            policy: RwLock::new(policy),
            recent_activity: RwLock::new(None),
        }
    }

    /// Replace the policy, as the host's settings screen would
    pub fn set_policy(&self, policy: LockPolicy) {
        *self.policy.write() = policy;
    }

    /// Edit the policy in place
    pub fn update_policy(&self, f: impl FnOnce(&mut LockPolicy)) {
        f(&mut self.policy.write());
    }
}

impl SettingsProvider for MemorySettings {
    fn lock_policy(&self) -> LockPolicy {
        self.policy.read().clone()
    }

    fn recent_activity(&self) -> Option<DateTime<Utc>> {
        *self.recent_activity.read()
    }

    fn set_recent_activity(&self, at: DateTime<Utc>) {
        *self.recent_activity.write() = Some(at);
    }
}
