//! Activity clock and lock timers
//!
//! The [`Watchdog`] is the orchestrator of the engine. It keeps one idle
//! timer per lock domain (app and database), reacts to lifecycle
//! transitions, consults the reboot detector, and drives the host through
//! the [`WatchdogDelegate`].
//!
//! ## Locking rules
//!
//! - Lock state is never cached: the delegate is asked before every
//!   "show lock" side effect, so re-evaluating an already locked domain is a
//!   no-op.
//! - Timeouts are measured against the wall clock from the last recorded
//!   activity, so time spent suspended in the background counts. Within a
//!   process a monotonic clock backs it up: whichever measure is longer
//!   decides.
//! - Domains with an `AppMinimized` trigger, and databases with `Immediately`
//!   or `Never` timeouts, arm no timer; they are handled on resign-active and
//!   became-active.
//!
//! Session flags sit behind one mutex that is never held across a delegate
//! call or an await.

use crate::audit::SecurityAuditLog;
use crate::clock::{BootTimeSource, Clock, SystemBootTime, SystemClock};
use crate::delegate::{DatabaseLockReason, MasterKeyCache, WatchdogDelegate};
use crate::eraser::DataEraser;
use crate::lifecycle::{LifecycleBus, LifecycleEvent};
use crate::policy::{AppLockTimeout, DatabaseLockTimeout, LockPolicy, TriggerMode};
use crate::reboot::{RebootCheck, RebootDetector};
use crate::self_destruct::SelfDestructCounter;
use crate::settings::SettingsProvider;
use crate::store::SecureCounterStore;
use crate::timer::LockTimer;
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Delay between activation and hiding the privacy cover
pub const COVER_HIDE_DELAY: Duration = Duration::from_millis(100);

/// Timeout locks detected within this window after the deadline are animated
const ANIMATED_LOCK_WINDOW: Duration = Duration::from_millis(200);

/// Activity stamped further ahead of the wall clock than this means the clock was set back
const CLOCK_SKEW_TOLERANCE: Duration = Duration::from_secs(1);

/// Collaborators the watchdog is built from
pub struct WatchdogConfig {
    settings: Arc<dyn SettingsProvider>,
    store: Arc<dyn SecureCounterStore>,
    eraser: Arc<dyn DataEraser>,
    clock: Arc<dyn Clock>,
    boot_time: Arc<dyn BootTimeSource>,
    key_cache: Option<Arc<dyn MasterKeyCache>>,
    audit: SecurityAuditLog,
    runtime: Option<Handle>,
}

impl WatchdogConfig {
    /// Configuration with the system clock and the OS boot time
    pub fn new(
        settings: Arc<dyn SettingsProvider>,
        store: Arc<dyn SecureCounterStore>,
        eraser: Arc<dyn DataEraser>,
    ) -> Self {
        Self {
            settings,
            store,
            eraser,
            clock: Arc::new(SystemClock),
            boot_time: Arc::new(SystemBootTime),
            key_cache: None,
            audit: SecurityAuditLog::default(),
            runtime: None,
        }
    }

    /// Use a different wall clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a different boot-time source
    pub fn with_boot_time(mut self, boot_time: Arc<dyn BootTimeSource>) -> Self {
        self.boot_time = boot_time;
        self
    }

    /// Forget cached master keys on database locks
    pub fn with_key_cache(mut self, key_cache: Arc<dyn MasterKeyCache>) -> Self {
        self.key_cache = Some(key_cache);
        self
    }

    /// Record into an existing audit log
    pub fn with_audit_log(mut self, audit: SecurityAuditLog) -> Self {
        self.audit = audit;
        self
    }

    /// Schedule timers on this runtime instead of the current one
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }
}

/// Result of reporting a wrong passcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedPasscodeOutcome {
    /// The attempt was counted
    Recorded,
    /// The attempt reached the limit and all local data was erased
    DataErased,
}

#[derive(Debug, Default)]
struct SessionState {
    ignore_minimization_once: bool,
    app_launch_handled: bool,
    first_launch_after_restart: bool,
    /// Monotonic time of the last restart, immune to wall-clock changes
    last_restart: Option<Instant>,
}

/// Activity clock and lock timer engine
pub struct Watchdog {
    me: Weak<Watchdog>,
    runtime: Handle,
    settings: Arc<dyn SettingsProvider>,
    clock: Arc<dyn Clock>,
    key_cache: Option<Arc<dyn MasterKeyCache>>,
    reboot: RebootDetector,
    self_destruct: SelfDestructCounter,
    delegate: RwLock<Option<Weak<dyn WatchdogDelegate>>>,
    state: Mutex<SessionState>,
    app_timer: LockTimer,
    database_timer: LockTimer,
    cover_timer: LockTimer,
    audit: SecurityAuditLog,
}

impl Watchdog {
    /// Build the engine.
    ///
    /// Fails with [`Error::Runtime`] when no runtime was configured and the
    /// caller is not inside a tokio runtime.
    pub fn new(config: WatchdogConfig) -> Result<Arc<Self>> {
        let runtime = match config.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()
                .map_err(|e| Error::Runtime(format!("Watchdog needs a tokio runtime: {}", e)))?,
        };

        let reboot = RebootDetector::new(Arc::clone(&config.store), config.boot_time);
        let self_destruct = SelfDestructCounter::new(config.store, config.eraser);

        Ok(Arc::new_cyclic(|me| Self {
            me: me.clone(),
            runtime,
            settings: config.settings,
            clock: config.clock,
            key_cache: config.key_cache,
            reboot,
            self_destruct,
            delegate: RwLock::new(None),
            state: Mutex::new(SessionState::default()),
            app_timer: LockTimer::new("app lock"),
            database_timer: LockTimer::new("database lock"),
            cover_timer: LockTimer::new("cover"),
            audit: config.audit,
        }))
    }

    /// Attach the host. Held weakly: once the host drops it, every
    /// operation becomes a no-op.
    pub fn set_delegate(&self, delegate: &Arc<dyn WatchdogDelegate>) {
        *self.delegate.write() = Some(Arc::downgrade(delegate));
    }

    /// Detach the host
    pub fn clear_delegate(&self) {
        *self.delegate.write() = None;
    }

    fn delegate(&self) -> Option<Arc<dyn WatchdogDelegate>> {
        self.delegate.read().as_ref().and_then(Weak::upgrade)
    }

    /// Subscribe to a lifecycle bus. The task ends when the bus closes or
    /// the engine is dropped.
    pub fn attach(&self, bus: &LifecycleBus) -> JoinHandle<()> {
        let mut events = bus.subscribe();
        let me = self.me.clone();
        self.runtime.spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(watchdog) = me.upgrade() else {
                            break;
                        };
                        watchdog.handle_event(event);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Watchdog missed {} lifecycle events", missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Lifecycle subscription ended");
        })
    }

    /// React to one lifecycle event
    pub fn handle_event(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::DidBecomeActive => self.on_app_became_active(),
            LifecycleEvent::WillResignActive => self.on_app_will_resign_active(),
            LifecycleEvent::ScreenLocked => self.on_screen_locked(),
            LifecycleEvent::ScreenUnlocked => {
                debug!("Screen unlocked");
                self.on_app_became_active();
            }
            LifecycleEvent::WindowDidBecomeKey => {
                debug!("Window did become key");
                self.on_app_became_active();
            }
            LifecycleEvent::WindowDidResignKey => {
                debug!("Window did resign key");
                self.on_app_will_resign_active();
            }
        }
    }

    /// Record user activity and re-arm both idle timers.
    ///
    /// No-op while the app is locked; timers are re-armed on unlock.
    pub fn restart(&self) {
        let Some(delegate) = self.delegate() else {
            return;
        };
        if delegate.is_app_lock_visible() {
            return;
        }

        self.settings.set_recent_activity(self.clock.now());
        self.state.lock().last_restart = Some(Instant::now());
        let policy = self.settings.lock_policy();
        self.restart_app_timer(&policy, Duration::ZERO);
        self.restart_database_timer(&policy, Duration::ZERO);
    }

    /// App came to the foreground
    pub fn on_app_became_active(&self) {
        debug!("App did become active");
        let Some(delegate) = self.delegate() else {
            return;
        };

        let suppressed = std::mem::take(&mut self.state.lock().ignore_minimization_once);
        let policy = self.settings.lock_policy();
        let mut database_locked = false;
        if suppressed {
            debug!("Self-backgrounding ignored");
            self.audit.suppression_consumed(self.clock.now());
        } else {
            // Timers do not run while suspended; catch up on what elapsed meanwhile
            self.maybe_lock_app(&policy);
            database_locked = self.maybe_lock_database(&policy);
        }

        if !delegate.is_app_lock_visible() {
            self.restart();
        } else if !database_locked {
            // Locked app: keep counting the database timeout from the last activity
            self.restart_database_timer(&policy, self.idle_elapsed());
        }

        let me = self.me.clone();
        self.cover_timer.arm(&self.runtime, COVER_HIDE_DELAY, move || {
            let Some(watchdog) = me.upgrade() else {
                return;
            };
            if let Some(delegate) = watchdog.delegate() {
                delegate.hide_app_cover();
            }
        });
    }

    /// App is about to leave the foreground
    pub fn on_app_will_resign_active(&self) {
        debug!("App will resign active");
        let Some(delegate) = self.delegate() else {
            return;
        };

        self.cover_timer.cancel();
        if delegate.is_app_lock_visible() {
            return;
        }
        delegate.show_app_cover();

        let suppressed = self.state.lock().ignore_minimization_once;
        let policy = self.settings.lock_policy();
        if suppressed {
            debug!("Going to background: minimization ignored once");
        } else {
            if policy.database_lock_timeout == DatabaseLockTimeout::Immediately {
                debug!("Going to background: Database Lock engaged");
                self.engage_database_lock(&policy, DatabaseLockReason::Timeout, false);
            }
            if policy.app_lock_enabled
                && policy.app_lock_timeout.trigger_mode() == Some(TriggerMode::AppMinimized)
            {
                debug!("Going to background: App Lock engaged");
                self.engage_app_lock();
            }
        }

        self.app_timer.cancel();
        self.database_timer.cancel();
    }

    fn on_screen_locked(&self) {
        debug!("Screen locked");
        if self.delegate().is_none() {
            return;
        }

        let policy = self.settings.lock_policy();
        if policy.lock_databases_on_screen_lock {
            debug!("Screen locked: Database Lock engaged");
            self.engage_database_lock(&policy, DatabaseLockReason::SystemEvent, false);
        }
        if policy.app_lock_enabled && policy.lock_app_on_screen_lock {
            debug!("Screen locked: App Lock engaged");
            self.engage_app_lock();
        }
        self.on_app_will_resign_active();
    }

    /// Skip the reaction to the next resign-active.
    ///
    /// For system UI (document picker, biometric prompt) that takes the
    /// foreground without the user leaving the app. Does not stack.
    pub fn ignore_minimization_once(&self) {
        let mut state = self.state.lock();
        if state.ignore_minimization_once {
            warn!("Minimization is already being ignored once; not stacking");
        }
        state.ignore_minimization_once = true;
    }

    /// The host verified the app passcode
    pub fn unlock_app(&self) {
        let Some(delegate) = self.delegate() else {
            return;
        };
        if !delegate.is_app_lock_visible() {
            return;
        }

        if let Err(e) = self.self_destruct.register_successful_unlock() {
            warn!("Cannot reset failed-attempt count: {}", e);
            self.audit
                .storage_fallback(self.clock.now(), "failed-attempt reset on unlock");
        }
        delegate.hide_app_cover();
        delegate.hide_app_lock();
        self.restart();
    }

    /// The host rejected an app passcode
    pub async fn register_failed_passcode(&self) -> FailedPasscodeOutcome {
        let policy = self.settings.lock_policy();
        self.audit.failed_attempt(self.clock.now());

        let audit = self.audit.clone();
        let clock = Arc::clone(&self.clock);
        let wiped = self
            .self_destruct
            .register_failed_attempt(policy.max_failed_attempts, move |report| {
                audit.data_erased(clock.now(), report.failures.len());
            })
            .await;

        if wiped {
            if let Some(delegate) = self.delegate() {
                delegate.did_erase_all_data();
            }
            return FailedPasscodeOutcome::DataErased;
        }

        if policy.lock_all_databases_on_failed_passcode {
            debug!("Failed passcode: Database Lock engaged");
            self.engage_database_lock(&policy, DatabaseLockReason::FailedPasscode, false);
        }
        FailedPasscodeOutcome::Recorded
    }

    /// Lock databases now, as for a "Lock Database" user action
    pub fn lock_database_now(&self) {
        let policy = self.settings.lock_policy();
        self.engage_database_lock(&policy, DatabaseLockReason::UserRequest, true);
    }

    /// Show the app lock now, if an app passcode is configured
    pub fn lock_app_now(&self) {
        if !self.settings.lock_policy().app_lock_enabled {
            debug!("App lock requested but no app passcode is set");
            return;
        }
        self.engage_app_lock();
    }

    /// Whether a reboot was detected (or assumed) during this process
    pub fn is_first_launch_after_restart(&self) -> bool {
        self.state.lock().first_launch_after_restart
    }

    /// Security audit trail
    pub fn audit_log(&self) -> &SecurityAuditLog {
        &self.audit
    }

    /// Failed-passcode counter shared with the engine
    pub fn self_destruct(&self) -> &SelfDestructCounter {
        &self.self_destruct
    }

    /// Time since the last activity: the larger of the wall-clock and the
    /// monotonic measure, so setting the clock back cannot postpone a lock.
    /// Activity recorded ahead of the clock means the clock was changed and
    /// counts as idle for good.
    fn idle_elapsed(&self) -> Duration {
        let now = self.clock.now();
        let wall = match self.settings.recent_activity() {
            None => Duration::ZERO,
            Some(last) if last <= now => (now - last).to_std().unwrap_or(Duration::ZERO),
            Some(last) => {
                let ahead = (last - now).to_std().unwrap_or(Duration::MAX);
                if ahead >= CLOCK_SKEW_TOLERANCE {
                    warn!(
                        "Last activity {} is {:?} ahead of the clock, treating as idle",
                        last, ahead
                    );
                    return Duration::MAX;
                }
                Duration::ZERO
            }
        };

        let monotonic = self
            .state
            .lock()
            .last_restart
            .map(|at| at.elapsed())
            .unwrap_or(Duration::ZERO);
        wall.max(monotonic)
    }

    fn should_engage_app_lock(&self, policy: &LockPolicy) -> bool {
        if !policy.app_lock_enabled {
            return false;
        }

        let first_evaluation = !std::mem::replace(&mut self.state.lock().app_launch_handled, true);
        if first_evaluation && policy.lock_app_on_launch {
            debug!("App launch: App Lock required");
            return true;
        }

        match policy.app_lock_timeout {
            AppLockTimeout::Never => false,
            AppLockTimeout::Immediately => true,
            AppLockTimeout::After { seconds, .. } => {
                self.idle_elapsed() >= Duration::from_secs(u64::from(seconds.get()))
            }
        }
    }

    fn maybe_lock_app(&self, policy: &LockPolicy) -> bool {
        if self.should_engage_app_lock(policy) {
            self.engage_app_lock();
            return true;
        }
        false
    }

    /// Returns whether a database lock was engaged
    fn maybe_lock_database(&self, policy: &LockPolicy) -> bool {
        let check = self.reboot.check();
        if check.assumes_reboot() {
            let now = self.clock.now();
            self.state.lock().first_launch_after_restart = true;
            match check {
                RebootCheck::StorageUnavailable => {
                    self.audit.storage_fallback(now, "boot timestamp");
                    self.audit.reboot_detected(now, true);
                }
                RebootCheck::BootTimeUnavailable => self.audit.reboot_detected(now, true),
                _ => self.audit.reboot_detected(now, false),
            }

            if policy.lock_on_device_reboot {
                debug!("Device reboot detected, locking the databases");
                self.engage_database_lock(policy, DatabaseLockReason::SystemEvent, false);
                return true;
            }
        }

        match policy.database_lock_timeout {
            DatabaseLockTimeout::Never => false,
            DatabaseLockTimeout::Immediately => {
                self.engage_database_lock(policy, DatabaseLockReason::Timeout, false);
                true
            }
            DatabaseLockTimeout::After(seconds) => {
                let timeout = Duration::from_secs(u64::from(seconds.get()));
                let elapsed = self.idle_elapsed();
                if elapsed < timeout {
                    return false;
                }
                let locked_just_now = elapsed - timeout < ANIMATED_LOCK_WINDOW;
                self.engage_database_lock(policy, DatabaseLockReason::Timeout, locked_just_now);
                true
            }
        }
    }

    fn restart_app_timer(&self, policy: &LockPolicy, elapsed: Duration) {
        self.app_timer.cancel();
        if !policy.app_lock_enabled {
            return;
        }
        let AppLockTimeout::After {
            seconds,
            trigger: TriggerMode::UserIdle,
        } = policy.app_lock_timeout
        else {
            return;
        };

        let delay = Duration::from_secs(u64::from(seconds.get())).saturating_sub(elapsed);
        let me = self.me.clone();
        self.app_timer.arm(&self.runtime, delay, move || {
            if let Some(watchdog) = me.upgrade() {
                watchdog.app_timer_fired();
            }
        });
    }

    fn restart_database_timer(&self, policy: &LockPolicy, elapsed: Duration) {
        self.database_timer.cancel();
        let Some(timeout) = policy.database_lock_timeout.duration() else {
            return;
        };

        let delay = timeout.saturating_sub(elapsed);
        let me = self.me.clone();
        self.database_timer.arm(&self.runtime, delay, move || {
            if let Some(watchdog) = me.upgrade() {
                watchdog.database_timer_fired();
            }
        });
    }

    fn app_timer_fired(&self) {
        if self.delegate().is_none() {
            return;
        }
        let policy = self.settings.lock_policy();
        if !self.maybe_lock_app(&policy) {
            // Wall clock disagrees with the timer; wait out the remainder
            self.restart_app_timer(&policy, self.idle_elapsed());
        }
    }

    fn database_timer_fired(&self) {
        if self.delegate().is_none() {
            return;
        }
        let policy = self.settings.lock_policy();
        if !self.maybe_lock_database(&policy) {
            self.restart_database_timer(&policy, self.idle_elapsed());
        }
    }

    fn engage_app_lock(&self) {
        let Some(delegate) = self.delegate() else {
            return;
        };
        if delegate.is_app_lock_visible() {
            return;
        }

        info!("Engaging App Lock");
        self.app_timer.cancel();
        delegate.show_app_lock();
        self.audit.app_lock_engaged(self.clock.now());
    }

    fn engage_database_lock(&self, policy: &LockPolicy, reason: DatabaseLockReason, animate: bool) {
        let Some(delegate) = self.delegate() else {
            return;
        };

        self.database_timer.cancel();

        // Cached keys go even when nothing is open
        let erase_keys = reason.must_erase_keys(policy.lock_databases_on_timeout);
        if erase_keys {
            if let Some(key_cache) = &self.key_cache {
                key_cache.erase_all_master_keys();
            }
        }

        if !delegate.has_open_database() {
            debug!("Database Lock ({}): no open database", reason.as_str());
            return;
        }

        info!("Engaging Database Lock ({})", reason.as_str());
        delegate.must_close_database(animate);
        self.audit
            .database_lock_engaged(self.clock.now(), reason, erase_keys);
    }
}
