//! Device reboot detection
//!
//! Biometric enrollment and enclave-backed state may be invalidated across a
//! reboot, so a detected reboot is a mandatory database-lock trigger. Only
//! the first check after a genuine reboot reports it; repeated checks within
//! one boot epoch are idempotent.

use crate::clock::BootTimeSource;
use crate::store::SecureCounterStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Boot times closer than this belong to the same boot epoch
pub const BOOT_TIME_TOLERANCE: Duration = Duration::from_secs(1);

/// Outcome of a reboot check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootCheck {
    /// Nothing stored yet; the current boot time was recorded
    FirstCheck,
    /// Same boot epoch as the stored value
    SameBoot,
    /// Boot time changed; the new value was recorded
    Rebooted,
    /// The OS could not report its boot time
    BootTimeUnavailable,
    /// Secure storage could not be read or written
    StorageUnavailable,
}

impl RebootCheck {
    /// Whether the engine must act as if the device rebooted.
    ///
    /// Both failure outcomes assume a reboot.
    pub fn assumes_reboot(&self) -> bool {
        !matches!(self, RebootCheck::FirstCheck | RebootCheck::SameBoot)
    }
}

/// Compares the OS boot time against the stored one
pub struct RebootDetector {
    store: Arc<dyn SecureCounterStore>,
    boot_time: Arc<dyn BootTimeSource>,
}

impl RebootDetector {
    /// Create a detector over the given store and boot-time source
    pub fn new(store: Arc<dyn SecureCounterStore>, boot_time: Arc<dyn BootTimeSource>) -> Self {
        Self { store, boot_time }
    }

    /// Has the device rebooted since the previous check?
    pub fn has_rebooted_since_last_check(&self) -> bool {
        self.check().assumes_reboot()
    }

    /// Run the check and report which path was taken
    pub fn check(&self) -> RebootCheck {
        let Some(current) = self.boot_time.current_boot_time() else {
            warn!("Cannot get boot time, assuming changed");
            return RebootCheck::BootTimeUnavailable;
        };

        let stored = match self.store.get_boot_timestamp() {
            Ok(stored) => stored,
            Err(e) => {
                error!("Secure storage read failed, assuming boot time changed: {}", e);
                return RebootCheck::StorageUnavailable;
            }
        };

        let outcome = match stored {
            None => RebootCheck::FirstCheck,
            Some(stored) => {
                let drift = if current >= stored { current - stored } else { stored - current };
                let tolerance = chrono::Duration::milliseconds(BOOT_TIME_TOLERANCE.as_millis() as i64);
                if drift < tolerance {
                    return RebootCheck::SameBoot;
                }
                RebootCheck::Rebooted
            }
        };

        if let Err(e) = self.store.set_boot_timestamp(current) {
            error!("Secure storage write failed, assuming boot time changed: {}", e);
            return RebootCheck::StorageUnavailable;
        }

        match outcome {
            RebootCheck::FirstCheck => debug!("Recorded initial boot time {}", current),
            _ => info!("Device reboot detected (boot time {})", current),
        }
        outcome
    }
}
