//! Wall-clock and boot-time sources
//!
//! Idle timeouts are measured against wall-clock time so that time spent
//! suspended in the background still counts.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::time::Duration;

/// Source of the current wall-clock time
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> DateTime<Utc>;
}

/// System wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock stopped at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::milliseconds(by.as_millis() as i64);
        let mut now = self.now.write();
        *now += delta;
    }

    /// Jump to an absolute time
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.write() = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// OS query for the time the device last booted
pub trait BootTimeSource: Send + Sync {
    /// Boot time, or `None` if the OS cannot report it
    fn current_boot_time(&self) -> Option<DateTime<Utc>>;
}

/// Boot time reported by the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBootTime;

impl BootTimeSource for SystemBootTime {
    fn current_boot_time(&self) -> Option<DateTime<Utc>> {
        let secs = sysinfo::System::boot_time();
        if secs == 0 {
            return None;
        }
        DateTime::<Utc>::from_timestamp(secs as i64, 0)
    }
}

/// Settable boot time for tests and simulations
#[derive(Debug, Default)]
pub struct ManualBootTime {
    boot: RwLock<Option<DateTime<Utc>>>,
}

impl ManualBootTime {
    /// Create with an initial boot time
    pub fn new(boot: Option<DateTime<Utc>>) -> Self {
        Self {
            boot: RwLock::new(boot),
        }
    }

    /// Simulate a reboot (or an OS that cannot report boot time, with `None`)
    pub fn set(&self, boot: Option<DateTime<Utc>>) {
        *self.boot.write() = boot;
    }
}

impl BootTimeSource for ManualBootTime {
    fn current_boot_time(&self) -> Option<DateTime<Utc>> {
        *self.boot.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advance() {
        let start = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = ManualClock::new(start);

        clock.advance(Duration::from_secs(90));
        assert_eq!((clock.now() - start).num_seconds(), 90);

        clock.advance(Duration::from_millis(250));
        assert_eq!((clock.now() - start).num_milliseconds(), 90_250);
    }

    #[test]
    fn test_system_boot_time_is_in_the_past() {
        if let Some(boot) = SystemBootTime.current_boot_time() {
            assert!(boot <= Utc::now());
        }
    }

    #[test]
    fn test_manual_boot_time() {
        let boot = ManualBootTime::new(None);
        assert!(boot.current_boot_time().is_none());

        let at = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        boot.set(Some(at));
        assert_eq!(boot.current_boot_time(), Some(at));
    }
}
