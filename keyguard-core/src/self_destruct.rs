//! Failed-passcode self-destruct
//!
//! Bounds the number of guesses an attacker with the device gets: once the
//! configured number of consecutive wrong passcodes is reached, every local
//! secret is erased.
//!
//! Ordering: the failed-attempt counter is reset only after the erasure pass
//! has finished and the secure store was emptied. A crash in between leaves
//! the counter non-zero, never a zero counter next to surviving secrets.

use crate::eraser::{DataEraser, ErasureReport};
use crate::policy::FailedAttemptLimit;
use crate::store::SecureCounterStore;
use crate::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Counts failed passcodes and triggers the wipe
pub struct SelfDestructCounter {
    store: Arc<dyn SecureCounterStore>,
    eraser: Arc<dyn DataEraser>,
    /// Serializes read-modify-write of the persisted count
    counter_lock: Mutex<()>,
    /// Serializes erasure passes
    erase_lock: tokio::sync::Mutex<()>,
}

impl SelfDestructCounter {
    /// Create a counter over the shared secure store
    pub fn new(store: Arc<dyn SecureCounterStore>, eraser: Arc<dyn DataEraser>) -> Self {
        Self {
            store,
            eraser,
            counter_lock: Mutex::new(()),
            erase_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Current persisted failed-attempt count
    pub fn failed_attempts(&self) -> Result<u32> {
        self.store.get_failed_attempts()
    }

    /// Record a wrong passcode. Returns `true` if this call wiped all data.
    ///
    /// `on_wiped` runs after the wipe has completed, and only if one happened.
    pub async fn register_failed_attempt<F>(&self, limit: FailedAttemptLimit, on_wiped: F) -> bool
    where
        F: FnOnce(&ErasureReport) + Send,
    {
        let Some(threshold) = limit.threshold() else {
            return false;
        };

        let count = self.increment();
        if count < threshold {
            debug!("Failed passcode attempt {}/{}", count, threshold);
            return false;
        }

        warn!(
            "Failed passcode limit reached ({}/{}), erasing all local data",
            count, threshold
        );
        let _wipe = self.erase_lock.lock().await;

        // A concurrent attempt may have wiped and reset the count meanwhile
        match self.store.get_failed_attempts() {
            Ok(current) if current < threshold => {
                debug!("Erasure already done by a concurrent attempt");
                return false;
            }
            Ok(_) => {}
            Err(e) => warn!("Cannot re-read failed-attempt count, erasing anyway: {}", e),
        }

        self.erase_locked(on_wiped).await;
        true
    }

    /// Record a verified unlock: the count goes back to zero
    pub fn register_successful_unlock(&self) -> Result<()> {
        let _guard = self.counter_lock.lock();
        self.store.set_failed_attempts(0)
    }

    /// Erase every local secret, then reset the count, then run `completion`
    pub async fn erase_everything<F>(&self, completion: F) -> ErasureReport
    where
        F: FnOnce(&ErasureReport) + Send,
    {
        let _wipe = self.erase_lock.lock().await;
        self.erase_locked(completion).await
    }

    async fn erase_locked<F>(&self, completion: F) -> ErasureReport
    where
        F: FnOnce(&ErasureReport) + Send,
    {
        info!("Erasing all local data");

        let report = self.eraser.delete_all_internal_files_and_secrets().await;
        if !report.is_complete() {
            warn!(
                "Erasure finished with {} failed item(s); continuing",
                report.failures.len()
            );
        }

        match self.store.erase_all() {
            Ok(()) => {
                let _guard = self.counter_lock.lock();
                if let Err(e) = self.store.set_failed_attempts(0) {
                    error!("Failed to reset failed-attempt count after erasure: {}", e);
                }
            }
            Err(e) => {
                error!(
                    "Secure store erasure failed, failed-attempt count left in place: {}",
                    e
                );
            }
        }

        completion(&report);
        report
    }

    fn increment(&self) -> u32 {
        let _guard = self.counter_lock.lock();
        let previous = match self.store.get_failed_attempts() {
            Ok(count) => count,
            Err(e) => {
                warn!("Cannot read failed-attempt count, counting from zero: {}", e);
                0
            }
        };

        let count = previous.saturating_add(1);
        if let Err(e) = self.store.set_failed_attempts(count) {
            error!("Cannot persist failed-attempt count {}: {}", count, e);
        }
        count
    }
}
