//! Secure Counter Store contract
//!
//! Keychain-equivalent storage for the last observed boot time and the
//! failed-attempt count. Implementations must stay usable early in launch,
//! before the rest of the app's settings are available.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Durable, tamper-resistant storage for the engine's two persisted values
///
/// Every call is synchronous from the engine's point of view.
pub trait SecureCounterStore: Send + Sync {
    /// Last stored device boot time, `None` if never stored
    fn get_boot_timestamp(&self) -> Result<Option<DateTime<Utc>>>;

    /// Store the device boot time
    fn set_boot_timestamp(&self, at: DateTime<Utc>) -> Result<()>;

    /// Consecutive failed passcode attempts, 0 if never stored
    fn get_failed_attempts(&self) -> Result<u32>;

    /// Store the failed passcode attempt count
    fn set_failed_attempts(&self, count: u32) -> Result<()>;

    /// Remove every secret held by this store, including cached master keys
    fn erase_all(&self) -> Result<()>;
}

#[derive(Debug, Default)]
struct MemoryValues {
    boot_timestamp: Option<DateTime<Utc>>,
    failed_attempts: Option<u32>,
}

/// In-memory store for tests and platforms without secure storage
///
/// Can simulate an inaccessible keychain with [`MemoryCounterStore::set_unavailable`].
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    values: RwLock<MemoryValues>,
    unavailable: AtomicBool,
}

impl MemoryCounterStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`Error::StorageUnavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::StorageUnavailable("Secure storage is locked".to_string()));
        }
        Ok(())
    }

    /// Whether anything is currently stored
    pub fn is_empty(&self) -> bool {
        let values = self.values.read();
        values.boot_timestamp.is_none() && values.failed_attempts.is_none()
    }
}

impl SecureCounterStore for MemoryCounterStore {
    fn get_boot_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        self.check_available()?;
        Ok(self.values.read().boot_timestamp)
    }

    fn set_boot_timestamp(&self, at: DateTime<Utc>) -> Result<()> {
        self.check_available()?;
        self.values.write().boot_timestamp = Some(at);
        Ok(())
    }

    fn get_failed_attempts(&self) -> Result<u32> {
        self.check_available()?;
        Ok(self.values.read().failed_attempts.unwrap_or(0))
    }

    fn set_failed_attempts(&self, count: u32) -> Result<()> {
        self.check_available()?;
        self.values.write().failed_attempts = Some(count);
        Ok(())
    }

    fn erase_all(&self) -> Result<()> {
        self.check_available()?;
        *self.values.write() = MemoryValues::default();
        Ok(())
    }
}
