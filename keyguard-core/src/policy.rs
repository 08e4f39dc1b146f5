//! Lock policy values consumed by the engine
//!
//! The policy is owned by the host's settings layer and read fresh on every
//! evaluation. Stored settings use the integer encoding `-1` = never,
//! `0` = immediately, `N > 0` = after N seconds. Anything the engine does not
//! recognize is resolved toward locking sooner, never later.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::warn;

/// Raw setting value meaning "never"
pub const RAW_NEVER: i64 = -1;

/// Raw setting value meaning "immediately"
pub const RAW_IMMEDIATELY: i64 = 0;

/// App lock timeouts up to this many seconds react to minimization when no
/// trigger mode is stored alongside them.
pub const MINIMIZED_TRIGGER_MAX_SECS: i64 = 3;

/// Default database lock timeout (one hour)
pub const DEFAULT_DATABASE_LOCK_SECS: u32 = 3_600;

/// What an idle timeout reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Lock once the user has been idle for the timeout
    UserIdle,
    /// Lock when the app leaves the foreground
    AppMinimized,
}

impl TriggerMode {
    /// Parse a stored trigger name. Unknown names react to minimization.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "user_idle" => TriggerMode::UserIdle,
            "app_minimized" => TriggerMode::AppMinimized,
            other => {
                warn!("Unknown lock trigger mode {:?}, assuming app_minimized", other);
                TriggerMode::AppMinimized
            }
        }
    }

    /// Stored name of this trigger mode
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMode::UserIdle => "user_idle",
            TriggerMode::AppMinimized => "app_minimized",
        }
    }
}

/// App lock timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLockTimeout {
    /// Never lock on timeout
    Never,
    /// Lock as soon as the app leaves the foreground
    Immediately,
    /// Lock after a number of seconds
    After {
        /// Timeout length
        seconds: NonZeroU32,
        /// Whether the timeout counts idle time or reacts to minimization
        trigger: TriggerMode,
    },
}

impl AppLockTimeout {
    /// Idle-time timeout. Zero seconds means [`AppLockTimeout::Immediately`].
    pub fn after_idle(seconds: u32) -> Self {
        Self::after(seconds, TriggerMode::UserIdle)
    }

    /// Minimization-triggered timeout. Zero seconds means [`AppLockTimeout::Immediately`].
    pub fn after_minimized(seconds: u32) -> Self {
        Self::after(seconds, TriggerMode::AppMinimized)
    }

    fn after(seconds: u32, trigger: TriggerMode) -> Self {
        match NonZeroU32::new(seconds) {
            Some(seconds) => AppLockTimeout::After { seconds, trigger },
            None => AppLockTimeout::Immediately,
        }
    }

    /// Decode a stored value, failing closed on anything unrecognized.
    pub fn from_raw(raw: i64, trigger: Option<&str>) -> Self {
        match raw {
            RAW_NEVER => AppLockTimeout::Never,
            RAW_IMMEDIATELY => AppLockTimeout::Immediately,
            n if n > 0 => {
                let trigger = match trigger {
                    Some(name) => TriggerMode::parse(name),
                    None if n <= MINIMIZED_TRIGGER_MAX_SECS => TriggerMode::AppMinimized,
                    None => TriggerMode::UserIdle,
                };
                Self::after(clamp_seconds(n), trigger)
            }
            n => {
                warn!("Unrecognized app lock timeout {}, assuming immediately", n);
                AppLockTimeout::Immediately
            }
        }
    }

    /// Encode for storage
    pub fn to_raw(&self) -> (i64, Option<TriggerMode>) {
        match self {
            AppLockTimeout::Never => (RAW_NEVER, None),
            AppLockTimeout::Immediately => (RAW_IMMEDIATELY, None),
            AppLockTimeout::After { seconds, trigger } => (i64::from(seconds.get()), Some(*trigger)),
        }
    }

    /// Trigger mode of this timeout; `Immediately` reacts to minimization.
    pub fn trigger_mode(&self) -> Option<TriggerMode> {
        match self {
            AppLockTimeout::Never => None,
            AppLockTimeout::Immediately => Some(TriggerMode::AppMinimized),
            AppLockTimeout::After { trigger, .. } => Some(*trigger),
        }
    }

    /// Timeout length, if this variant has one
    pub fn duration(&self) -> Option<Duration> {
        match self {
            AppLockTimeout::After { seconds, .. } => Some(Duration::from_secs(u64::from(seconds.get()))),
            _ => None,
        }
    }
}

/// Database lock timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseLockTimeout {
    /// Never lock on timeout
    Never,
    /// Lock as soon as the app leaves the foreground
    Immediately,
    /// Lock after the user has been idle this many seconds
    After(NonZeroU32),
}

impl DatabaseLockTimeout {
    /// Idle-time timeout. Zero seconds means [`DatabaseLockTimeout::Immediately`].
    pub fn after(seconds: u32) -> Self {
        match NonZeroU32::new(seconds) {
            Some(seconds) => DatabaseLockTimeout::After(seconds),
            None => DatabaseLockTimeout::Immediately,
        }
    }

    /// Decode a stored value, failing closed on anything unrecognized.
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            RAW_NEVER => DatabaseLockTimeout::Never,
            RAW_IMMEDIATELY => DatabaseLockTimeout::Immediately,
            n if n > 0 => Self::after(clamp_seconds(n)),
            n => {
                warn!("Unrecognized database lock timeout {}, assuming immediately", n);
                DatabaseLockTimeout::Immediately
            }
        }
    }

    /// Encode for storage
    pub fn to_raw(&self) -> i64 {
        match self {
            DatabaseLockTimeout::Never => RAW_NEVER,
            DatabaseLockTimeout::Immediately => RAW_IMMEDIATELY,
            DatabaseLockTimeout::After(seconds) => i64::from(seconds.get()),
        }
    }

    /// Timeout length, if this variant has one
    pub fn duration(&self) -> Option<Duration> {
        match self {
            DatabaseLockTimeout::After(seconds) => Some(Duration::from_secs(u64::from(seconds.get()))),
            _ => None,
        }
    }
}

/// Failed passcode attempts allowed before all local data is erased
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedAttemptLimit {
    /// Self-destruct disabled
    Never,
    /// Erase once this many consecutive attempts have failed
    After(NonZeroU32),
}

impl FailedAttemptLimit {
    /// Limit of `attempts`; zero disables self-destruct.
    pub fn after(attempts: u32) -> Self {
        match NonZeroU32::new(attempts) {
            Some(attempts) => FailedAttemptLimit::After(attempts),
            None => FailedAttemptLimit::Never,
        }
    }

    /// Decode a stored value.
    ///
    /// Unrecognized values disable the feature: erasure cannot be undone.
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            RAW_NEVER | 0 => FailedAttemptLimit::Never,
            n if n > 0 => Self::after(clamp_seconds(n)),
            n => {
                warn!("Unrecognized failed-attempt limit {}, self-destruct disabled", n);
                FailedAttemptLimit::Never
            }
        }
    }

    /// Encode for storage
    pub fn to_raw(&self) -> i64 {
        match self {
            FailedAttemptLimit::Never => RAW_NEVER,
            FailedAttemptLimit::After(n) => i64::from(n.get()),
        }
    }

    /// Threshold, if enabled
    pub fn threshold(&self) -> Option<u32> {
        match self {
            FailedAttemptLimit::Never => None,
            FailedAttemptLimit::After(n) => Some(n.get()),
        }
    }
}

fn clamp_seconds(raw: i64) -> u32 {
    u32::try_from(raw).unwrap_or(u32::MAX)
}

/// Lock policy, read-only to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawLockPolicy", into = "RawLockPolicy")]
pub struct LockPolicy {
    /// Whether an app passcode is configured at all
    pub app_lock_enabled: bool,
    /// App lock timeout
    pub app_lock_timeout: AppLockTimeout,
    /// Database lock timeout
    pub database_lock_timeout: DatabaseLockTimeout,
    /// Lock databases after a device reboot
    pub lock_on_device_reboot: bool,
    /// Lock databases after a wrong app passcode
    pub lock_all_databases_on_failed_passcode: bool,
    /// Self-destruct threshold
    pub max_failed_attempts: FailedAttemptLimit,
    /// Show the app lock on the first activation of the process
    pub lock_app_on_launch: bool,
    /// Forget master keys when a database lock is caused by a timeout
    pub lock_databases_on_timeout: bool,
    /// Lock the app when the screen locks (desktop)
    pub lock_app_on_screen_lock: bool,
    /// Lock databases when the screen locks (desktop)
    pub lock_databases_on_screen_lock: bool,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            app_lock_enabled: false,
            app_lock_timeout: AppLockTimeout::Immediately,
            database_lock_timeout: DatabaseLockTimeout::after(DEFAULT_DATABASE_LOCK_SECS),
            lock_on_device_reboot: false,
            lock_all_databases_on_failed_passcode: true,
            max_failed_attempts: FailedAttemptLimit::Never,
            lock_app_on_launch: false,
            lock_databases_on_timeout: true,
            lock_app_on_screen_lock: false,
            lock_databases_on_screen_lock: false,
        }
    }
}

impl LockPolicy {
    /// Policy used when the stored one cannot be read.
    ///
    /// Databases lock as early as possible. The app lock stays off because
    /// whether a passcode exists is unknown.
    pub fn fail_closed() -> Self {
        Self {
            app_lock_timeout: AppLockTimeout::Immediately,
            database_lock_timeout: DatabaseLockTimeout::Immediately,
            lock_on_device_reboot: true,
            lock_all_databases_on_failed_passcode: true,
            lock_databases_on_timeout: true,
            lock_databases_on_screen_lock: true,
            ..Self::default()
        }
    }

    /// Parse a policy document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Policy(format!("Invalid lock policy: {}", e)))
    }

    /// Serialize to a policy document
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Stored form of [`LockPolicy`]
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawLockPolicy {
    pub app_lock_enabled: bool,
    pub app_lock_timeout: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_lock_trigger: Option<String>,
    pub database_lock_timeout: i64,
    pub lock_on_device_reboot: bool,
    pub lock_all_databases_on_failed_passcode: bool,
    pub max_failed_attempts: i64,
    pub lock_app_on_launch: bool,
    pub lock_databases_on_timeout: bool,
    pub lock_app_on_screen_lock: bool,
    pub lock_databases_on_screen_lock: bool,
}

impl Default for RawLockPolicy {
    fn default() -> Self {
        LockPolicy::default().into()
    }
}

impl From<RawLockPolicy> for LockPolicy {
    fn from(raw: RawLockPolicy) -> Self {
        Self {
            app_lock_enabled: raw.app_lock_enabled,
            app_lock_timeout: AppLockTimeout::from_raw(
                raw.app_lock_timeout,
                raw.app_lock_trigger.as_deref(),
            ),
            database_lock_timeout: DatabaseLockTimeout::from_raw(raw.database_lock_timeout),
            lock_on_device_reboot: raw.lock_on_device_reboot,
            lock_all_databases_on_failed_passcode: raw.lock_all_databases_on_failed_passcode,
            max_failed_attempts: FailedAttemptLimit::from_raw(raw.max_failed_attempts),
            lock_app_on_launch: raw.lock_app_on_launch,
            lock_databases_on_timeout: raw.lock_databases_on_timeout,
            lock_app_on_screen_lock: raw.lock_app_on_screen_lock,
            lock_databases_on_screen_lock: raw.lock_databases_on_screen_lock,
        }
    }
}

impl From<LockPolicy> for RawLockPolicy {
    fn from(policy: LockPolicy) -> Self {
        let (app_lock_timeout, trigger) = policy.app_lock_timeout.to_raw();
        Self {
            app_lock_enabled: policy.app_lock_enabled,
            app_lock_timeout,
            app_lock_trigger: trigger.map(|t| t.as_str().to_string()),
            database_lock_timeout: policy.database_lock_timeout.to_raw(),
            lock_on_device_reboot: policy.lock_on_device_reboot,
            lock_all_databases_on_failed_passcode: policy.lock_all_databases_on_failed_passcode,
            max_failed_attempts: policy.max_failed_attempts.to_raw(),
            lock_app_on_launch: policy.lock_app_on_launch,
            lock_databases_on_timeout: policy.lock_databases_on_timeout,
            lock_app_on_screen_lock: policy.lock_app_on_screen_lock,
            lock_databases_on_screen_lock: policy.lock_databases_on_screen_lock,
        }
    }
}
