//! Watchdog behavior under scripted lifecycle sequences
//!
//! Timers run on a paused tokio clock; the engine's wall clock is a
//! `ManualClock` advanced in lockstep.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyguard_core::{
    AppLockTimeout, Clock, DataEraser, DatabaseLockReason, DatabaseLockTimeout, ErasureReport,
    FailedAttemptLimit, FailedPasscodeOutcome, LifecycleBus, LifecycleEvent, LockPolicy,
    ManualBootTime, ManualClock, MasterKeyCache, MemoryCounterStore, MemorySettings,
    SecureCounterStore, SecurityEventKind, SettingsProvider, Watchdog, WatchdogConfig,
    WatchdogDelegate, COVER_HIDE_DELAY,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test doubles
// ============================================================================

struct MockDelegate {
    lock_visible: AtomicBool,
    cover_visible: AtomicBool,
    database_open: AtomicBool,
    show_lock: AtomicUsize,
    hide_lock: AtomicUsize,
    show_cover: AtomicUsize,
    hide_cover: AtomicUsize,
    closes: Mutex<Vec<bool>>,
    erased: AtomicUsize,
}

impl MockDelegate {
    fn new() -> Self {
        Self {
            lock_visible: AtomicBool::new(false),
            cover_visible: AtomicBool::new(false),
            database_open: AtomicBool::new(true),
            show_lock: AtomicUsize::new(0),
            hide_lock: AtomicUsize::new(0),
            show_cover: AtomicUsize::new(0),
            hide_cover: AtomicUsize::new(0),
            closes: Mutex::new(Vec::new()),
            erased: AtomicUsize::new(0),
        }
    }

    fn show_lock_calls(&self) -> usize {
        self.show_lock.load(Ordering::SeqCst)
    }

    fn close_calls(&self) -> Vec<bool> {
        self.closes.lock().clone()
    }

    fn open_database(&self) {
        self.database_open.store(true, Ordering::SeqCst);
    }
}

impl WatchdogDelegate for MockDelegate {
    fn is_app_lock_visible(&self) -> bool {
        self.lock_visible.load(Ordering::SeqCst)
    }

    fn show_app_lock(&self) {
        self.show_lock.fetch_add(1, Ordering::SeqCst);
        self.lock_visible.store(true, Ordering::SeqCst);
    }

    fn hide_app_lock(&self) {
        self.hide_lock.fetch_add(1, Ordering::SeqCst);
        self.lock_visible.store(false, Ordering::SeqCst);
    }

    fn is_app_cover_visible(&self) -> bool {
        self.cover_visible.load(Ordering::SeqCst)
    }

    fn show_app_cover(&self) {
        self.show_cover.fetch_add(1, Ordering::SeqCst);
        self.cover_visible.store(true, Ordering::SeqCst);
    }

    fn hide_app_cover(&self) {
        self.hide_cover.fetch_add(1, Ordering::SeqCst);
        self.cover_visible.store(false, Ordering::SeqCst);
    }

    fn must_close_database(&self, animate: bool) {
        self.closes.lock().push(animate);
        self.database_open.store(false, Ordering::SeqCst);
    }

    fn has_open_database(&self) -> bool {
        self.database_open.load(Ordering::SeqCst)
    }

    fn did_erase_all_data(&self) {
        self.erased.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct CountingKeyCache(AtomicUsize);

impl MasterKeyCache for CountingKeyCache {
    fn erase_all_master_keys(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct CountingEraser(AtomicUsize);

#[async_trait]
impl DataEraser for CountingEraser {
    async fn delete_all_internal_files_and_secrets(&self) -> ErasureReport {
        self.0.fetch_add(1, Ordering::SeqCst);
        ErasureReport {
            attempted: 1,
            removed: 1,
            failures: vec![],
        }
    }
}

struct Fixture {
    watchdog: Arc<Watchdog>,
    delegate: Arc<MockDelegate>,
    // Keeps the delegate attached; dropping it detaches the host
    _host: Arc<dyn WatchdogDelegate>,
    settings: Arc<MemorySettings>,
    store: Arc<MemoryCounterStore>,
    clock: Arc<ManualClock>,
    boot: Arc<ManualBootTime>,
    keys: Arc<CountingKeyCache>,
    eraser: Arc<CountingEraser>,
}

fn boot_at(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
}

fn fixture(policy: LockPolicy) -> Fixture {
    let settings = Arc::new(MemorySettings::new(policy));
    let store = Arc::new(MemoryCounterStore::new());
    let clock = Arc::new(ManualClock::new(boot_at(1_700_000_000)));
    let boot = Arc::new(ManualBootTime::new(Some(boot_at(1_699_990_000))));
    let keys = Arc::new(CountingKeyCache::default());
    let eraser = Arc::new(CountingEraser::default());

    let config = WatchdogConfig::new(settings.clone(), store.clone(), eraser.clone())
        .with_clock(clock.clone())
        .with_boot_time(boot.clone())
        .with_key_cache(keys.clone());
    let watchdog = Watchdog::new(config).unwrap();

    let delegate = Arc::new(MockDelegate::new());
    let host: Arc<dyn WatchdogDelegate> = delegate.clone();
    watchdog.set_delegate(&host);

    Fixture {
        watchdog,
        delegate,
        _host: host,
        settings,
        store,
        clock,
        boot,
        keys,
        eraser,
    }
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

async fn advance(f: &Fixture, by: Duration) {
    f.clock.advance(by);
    tokio::time::advance(by).await;
    settle().await;
}

fn idle_app_policy(seconds: u32) -> LockPolicy {
    LockPolicy {
        app_lock_enabled: true,
        app_lock_timeout: AppLockTimeout::after_idle(seconds),
        database_lock_timeout: DatabaseLockTimeout::Never,
        ..Default::default()
    }
}

fn database_policy(timeout: DatabaseLockTimeout) -> LockPolicy {
    LockPolicy {
        database_lock_timeout: timeout,
        ..Default::default()
    }
}

// ============================================================================
// Idle timeouts
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_app_locks_once_after_idle_timeout() {
    let f = fixture(idle_app_policy(60));
    f.watchdog.on_app_became_active();
    settle().await;
    assert_eq!(f.delegate.show_lock_calls(), 0);

    advance(&f, Duration::from_secs(59)).await;
    assert_eq!(f.delegate.show_lock_calls(), 0);

    advance(&f, Duration::from_secs(1)).await;
    assert_eq!(f.delegate.show_lock_calls(), 1);

    advance(&f, Duration::from_secs(600)).await;
    assert_eq!(f.delegate.show_lock_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_restart_postpones_app_lock() {
    let f = fixture(idle_app_policy(60));
    f.watchdog.on_app_became_active();
    settle().await;

    advance(&f, Duration::from_secs(50)).await;
    f.watchdog.restart();
    advance(&f, Duration::from_secs(50)).await;
    assert_eq!(f.delegate.show_lock_calls(), 0);

    advance(&f, Duration::from_secs(10)).await;
    assert_eq!(f.delegate.show_lock_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_database_locks_after_idle_timeout() {
    let f = fixture(database_policy(DatabaseLockTimeout::after(120)));
    f.watchdog.on_app_became_active();
    settle().await;

    advance(&f, Duration::from_secs(119)).await;
    assert!(f.delegate.close_calls().is_empty());

    advance(&f, Duration::from_secs(1)).await;
    // Detected right at the deadline: animated
    assert_eq!(f.delegate.close_calls(), vec![true]);
    assert_eq!(f.keys.0.load(Ordering::SeqCst), 1);
    assert_eq!(f.delegate.show_lock_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_lock_keeps_keys_when_configured() {
    let mut policy = database_policy(DatabaseLockTimeout::after(30));
    policy.lock_databases_on_timeout = false;
    let f = fixture(policy);
    f.watchdog.on_app_became_active();
    settle().await;

    advance(&f, Duration::from_secs(30)).await;
    assert_eq!(f.delegate.close_calls().len(), 1);
    assert_eq!(f.keys.0.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_elapsed_in_background_is_caught_on_activation() {
    let mut policy = idle_app_policy(60);
    policy.database_lock_timeout = DatabaseLockTimeout::after(300);
    let f = fixture(policy);
    f.watchdog.on_app_became_active();
    settle().await;

    f.watchdog.on_app_will_resign_active();
    assert_eq!(f.delegate.show_lock_calls(), 0);

    // Suspended: timers were cancelled on resign
    advance(&f, Duration::from_secs(3_600)).await;
    assert_eq!(f.delegate.show_lock_calls(), 0);
    assert!(f.delegate.close_calls().is_empty());

    f.watchdog.on_app_became_active();
    settle().await;
    assert_eq!(f.delegate.show_lock_calls(), 1);
    // Long overdue: not animated
    assert_eq!(f.delegate.close_calls(), vec![false]);
}

#[tokio::test(start_paused = true)]
async fn test_locked_app_keeps_database_timer_running() {
    let mut policy = idle_app_policy(60);
    policy.database_lock_timeout = DatabaseLockTimeout::after(300);
    let f = fixture(policy);
    f.watchdog.on_app_became_active();
    settle().await;

    advance(&f, Duration::from_secs(60)).await;
    assert_eq!(f.delegate.show_lock_calls(), 1);

    // App sits on its lock screen; the database still times out on schedule
    advance(&f, Duration::from_secs(240)).await;
    assert_eq!(f.delegate.close_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_clock_set_back_cannot_postpone_lock() {
    let f = fixture(database_policy(DatabaseLockTimeout::after(60)));
    f.watchdog.on_app_became_active();
    settle().await;
    f.watchdog.restart();

    f.clock.set(boot_at(1_700_000_000 - 3_600));
    for _ in 0..10 {
        advance(&f, Duration::from_secs(60)).await;
    }

    // Activity now lies in the future: treated as long idle, locked once
    assert_eq!(f.delegate.close_calls(), vec![false]);
}

#[tokio::test(start_paused = true)]
async fn test_monotonic_idle_wins_over_rewound_clock() {
    let f = fixture(database_policy(DatabaseLockTimeout::after(60)));
    f.watchdog.on_app_became_active();
    settle().await;

    advance(&f, Duration::from_secs(30)).await;
    // Back to the activity time: the wall clock alone would see no idle time
    f.clock.set(boot_at(1_700_000_000));

    advance(&f, Duration::from_secs(29)).await;
    assert!(f.delegate.close_calls().is_empty());

    advance(&f, Duration::from_secs(1)).await;
    assert_eq!(f.delegate.close_calls(), vec![true]);
}

#[tokio::test(start_paused = true)]
async fn test_small_clock_skew_is_tolerated() {
    let f = fixture(idle_app_policy(60));
    f.watchdog.on_app_became_active();
    settle().await;

    f.clock.set(boot_at(1_700_000_000) - chrono::Duration::milliseconds(400));
    f.watchdog.on_app_will_resign_active();
    f.watchdog.on_app_became_active();
    settle().await;
    assert_eq!(f.delegate.show_lock_calls(), 0);
}

// ============================================================================
// Minimization
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_minimized_trigger_locks_synchronously() {
    let policy = LockPolicy {
        app_lock_enabled: true,
        app_lock_timeout: AppLockTimeout::after_minimized(3),
        ..Default::default()
    };
    let f = fixture(policy);
    f.watchdog.on_app_became_active();
    settle().await;

    f.watchdog.on_app_will_resign_active();
    assert_eq!(f.delegate.show_lock_calls(), 1);
    assert_eq!(f.delegate.show_cover.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_minimized_trigger_arms_no_timer() {
    let policy = LockPolicy {
        app_lock_enabled: true,
        app_lock_timeout: AppLockTimeout::after_minimized(60),
        database_lock_timeout: DatabaseLockTimeout::Never,
        ..Default::default()
    };
    let f = fixture(policy);
    f.watchdog.on_app_became_active();
    settle().await;

    advance(&f, Duration::from_secs(3_600)).await;
    assert_eq!(f.delegate.show_lock_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_immediate_database_timeout_locks_on_resign() {
    let f = fixture(database_policy(DatabaseLockTimeout::Immediately));
    f.delegate.database_open.store(false, Ordering::SeqCst);
    f.watchdog.on_app_became_active();
    settle().await;

    f.delegate.open_database();
    f.watchdog.on_app_will_resign_active();
    assert_eq!(f.delegate.close_calls(), vec![false]);
}

#[tokio::test(start_paused = true)]
async fn test_cover_shown_on_resign_unless_locked() {
    let policy = LockPolicy {
        app_lock_enabled: true,
        app_lock_timeout: AppLockTimeout::Never,
        ..Default::default()
    };
    let f = fixture(policy);
    f.watchdog.on_app_became_active();
    settle().await;

    f.watchdog.on_app_will_resign_active();
    assert_eq!(f.delegate.show_cover.load(Ordering::SeqCst), 1);

    f.watchdog.lock_app_now();
    f.watchdog.on_app_will_resign_active();
    assert_eq!(f.delegate.show_cover.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cover_hidden_after_delay() {
    let f = fixture(LockPolicy::default());
    f.watchdog.on_app_became_active();
    settle().await;
    assert_eq!(f.delegate.hide_cover.load(Ordering::SeqCst), 0);

    advance(&f, COVER_HIDE_DELAY).await;
    assert_eq!(f.delegate.hide_cover.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resign_cancels_pending_cover_hide() {
    let f = fixture(LockPolicy::default());
    f.watchdog.on_app_became_active();
    settle().await;

    advance(&f, Duration::from_millis(50)).await;
    f.watchdog.on_app_will_resign_active();
    advance(&f, Duration::from_secs(1)).await;

    assert_eq!(f.delegate.hide_cover.load(Ordering::SeqCst), 0);
    assert!(f.delegate.is_app_cover_visible());
}

// ============================================================================
// One-shot suppression
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_ignore_minimization_once_suppresses_exactly_one_resign() {
    let policy = LockPolicy {
        app_lock_enabled: true,
        app_lock_timeout: AppLockTimeout::Immediately,
        ..Default::default()
    };
    let f = fixture(policy);
    f.watchdog.on_app_became_active();
    settle().await;
    // Immediately locks on every activation; start from an unlocked app
    f.watchdog.unlock_app();

    f.watchdog.ignore_minimization_once();
    f.watchdog.on_app_will_resign_active();
    assert_eq!(f.delegate.show_lock_calls(), 1);

    f.watchdog.on_app_became_active();
    settle().await;
    assert_eq!(f.delegate.show_lock_calls(), 1);

    f.watchdog.on_app_will_resign_active();
    assert_eq!(f.delegate.show_lock_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_suppression_does_not_stack() {
    let policy = LockPolicy {
        app_lock_enabled: true,
        app_lock_timeout: AppLockTimeout::after_minimized(1),
        ..Default::default()
    };
    let f = fixture(policy);
    f.watchdog.on_app_became_active();
    settle().await;

    f.watchdog.ignore_minimization_once();
    f.watchdog.ignore_minimization_once();
    f.watchdog.on_app_will_resign_active();
    assert_eq!(f.delegate.show_lock_calls(), 0);

    f.watchdog.on_app_became_active();
    settle().await;
    f.watchdog.on_app_will_resign_active();
    assert_eq!(f.delegate.show_lock_calls(), 1);

    let consumed = f
        .watchdog
        .audit_log()
        .snapshot()
        .into_iter()
        .filter(|e| e.kind == SecurityEventKind::SuppressionConsumed)
        .count();
    assert_eq!(consumed, 1);
}

// ============================================================================
// Idempotence and explicit locks
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_repeated_app_lock_shows_lock_once() {
    let f = fixture(idle_app_policy(60));
    f.watchdog.on_app_became_active();
    settle().await;

    f.watchdog.lock_app_now();
    f.watchdog.lock_app_now();
    f.watchdog.on_app_will_resign_active();
    f.watchdog.on_app_became_active();
    settle().await;
    advance(&f, Duration::from_secs(120)).await;

    assert_eq!(f.delegate.show_lock_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_app_lock_disabled_never_locks() {
    let policy = LockPolicy {
        app_lock_enabled: false,
        app_lock_timeout: AppLockTimeout::Immediately,
        lock_app_on_launch: true,
        database_lock_timeout: DatabaseLockTimeout::Never,
        ..Default::default()
    };
    let f = fixture(policy);
    f.watchdog.on_app_became_active();
    f.watchdog.on_app_will_resign_active();
    f.watchdog.on_app_became_active();
    f.watchdog.lock_app_now();
    settle().await;

    assert_eq!(f.delegate.show_lock_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_lock_on_launch_applies_once() {
    let policy = LockPolicy {
        app_lock_enabled: true,
        app_lock_timeout: AppLockTimeout::after_idle(600),
        lock_app_on_launch: true,
        ..Default::default()
    };
    let f = fixture(policy);

    f.watchdog.on_app_became_active();
    settle().await;
    assert_eq!(f.delegate.show_lock_calls(), 1);

    f.watchdog.unlock_app();
    f.watchdog.on_app_will_resign_active();
    f.watchdog.on_app_became_active();
    settle().await;
    assert_eq!(f.delegate.show_lock_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lock_database_now_is_user_request() {
    let mut policy = database_policy(DatabaseLockTimeout::Never);
    policy.lock_databases_on_timeout = false;
    let f = fixture(policy);

    f.watchdog.lock_database_now();
    f.watchdog.lock_database_now();

    // Second request finds nothing open: keys still go, nothing is recorded
    assert_eq!(f.delegate.close_calls(), vec![true]);
    assert_eq!(f.keys.0.load(Ordering::SeqCst), 2);
    let reasons: Vec<_> = f
        .watchdog
        .audit_log()
        .snapshot()
        .into_iter()
        .filter_map(|e| match e.kind {
            SecurityEventKind::DatabaseLockEngaged { reason, .. } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(reasons, vec![DatabaseLockReason::UserRequest]);
}

#[tokio::test(start_paused = true)]
async fn test_unlock_app_resets_count_and_rearms() {
    let f = fixture(idle_app_policy(60));
    f.watchdog.on_app_became_active();
    settle().await;
    f.store.set_failed_attempts(3).unwrap();

    // Not locked: no-op
    f.watchdog.unlock_app();
    assert_eq!(f.store.get_failed_attempts().unwrap(), 3);

    f.watchdog.lock_app_now();
    advance(&f, Duration::from_secs(30)).await;
    f.watchdog.unlock_app();
    assert_eq!(f.store.get_failed_attempts().unwrap(), 0);
    assert_eq!(f.delegate.hide_lock.load(Ordering::SeqCst), 1);
    assert_eq!(f.settings.recent_activity(), Some(f.clock.now()));

    advance(&f, Duration::from_secs(60)).await;
    assert_eq!(f.delegate.show_lock_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_restart_is_noop_while_locked() {
    let f = fixture(idle_app_policy(60));
    f.watchdog.on_app_became_active();
    settle().await;
    let activity = f.settings.recent_activity();

    f.watchdog.lock_app_now();
    advance(&f, Duration::from_secs(10)).await;
    f.watchdog.restart();

    assert_eq!(f.settings.recent_activity(), activity);
}

#[tokio::test(start_paused = true)]
async fn test_relock_with_nothing_open_is_not_recorded() {
    let policy = LockPolicy {
        app_lock_enabled: true,
        app_lock_timeout: AppLockTimeout::after_idle(30),
        database_lock_timeout: DatabaseLockTimeout::after(60),
        ..Default::default()
    };
    let f = fixture(policy);
    f.watchdog.on_app_became_active();
    settle().await;

    advance(&f, Duration::from_secs(60)).await;
    assert_eq!(f.delegate.show_lock_calls(), 1);
    assert_eq!(f.delegate.close_calls(), vec![true]);

    for _ in 0..3 {
        f.watchdog.on_app_will_resign_active();
        f.watchdog.on_app_became_active();
        settle().await;
    }

    let database_locks = f
        .watchdog
        .audit_log()
        .snapshot()
        .into_iter()
        .filter(|e| matches!(e.kind, SecurityEventKind::DatabaseLockEngaged { .. }))
        .count();
    assert_eq!(database_locks, 1);
    assert_eq!(f.delegate.close_calls(), vec![true]);
}

// ============================================================================
// Reboot detection
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reboot_locks_databases_once() {
    let mut policy = database_policy(DatabaseLockTimeout::Never);
    policy.lock_on_device_reboot = true;
    let f = fixture(policy);

    f.watchdog.on_app_became_active();
    settle().await;
    assert!(f.delegate.close_calls().is_empty());
    assert!(!f.watchdog.is_first_launch_after_restart());

    f.watchdog.on_app_will_resign_active();
    f.boot.set(Some(boot_at(1_700_100_000)));
    f.watchdog.on_app_became_active();
    settle().await;
    assert_eq!(f.delegate.close_calls(), vec![false]);
    assert!(f.watchdog.is_first_launch_after_restart());
    assert_eq!(f.keys.0.load(Ordering::SeqCst), 1);

    f.delegate.open_database();
    f.watchdog.on_app_will_resign_active();
    f.watchdog.on_app_became_active();
    settle().await;
    assert_eq!(f.delegate.close_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reboot_ignored_when_policy_off() {
    let f = fixture(database_policy(DatabaseLockTimeout::Never));
    f.watchdog.on_app_became_active();
    f.boot.set(Some(boot_at(1_700_100_000)));
    f.watchdog.on_app_became_active();
    settle().await;

    assert!(f.delegate.close_calls().is_empty());
    assert!(f.watchdog.is_first_launch_after_restart());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_boot_time_fails_safe() {
    let mut policy = database_policy(DatabaseLockTimeout::Never);
    policy.lock_on_device_reboot = true;
    let f = fixture(policy);
    f.boot.set(None);

    f.watchdog.on_app_became_active();
    settle().await;

    assert_eq!(f.delegate.close_calls(), vec![false]);
    assert!(f
        .watchdog
        .audit_log()
        .snapshot()
        .iter()
        .any(|e| e.kind == SecurityEventKind::RebootDetected { assumed: true }));
}

#[tokio::test(start_paused = true)]
async fn test_locked_storage_fails_safe() {
    let mut policy = database_policy(DatabaseLockTimeout::Never);
    policy.lock_on_device_reboot = true;
    let f = fixture(policy);
    f.store.set_unavailable(true);

    f.watchdog.on_app_became_active();
    settle().await;

    assert_eq!(f.delegate.close_calls().len(), 1);
    assert!(f.watchdog.is_first_launch_after_restart());
}

// ============================================================================
// Failed passcodes
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_failed_passcodes_wipe_on_fifth() {
    let policy = LockPolicy {
        app_lock_enabled: true,
        max_failed_attempts: FailedAttemptLimit::after(5),
        ..Default::default()
    };
    let f = fixture(policy);

    for _ in 0..4 {
        assert_eq!(
            f.watchdog.register_failed_passcode().await,
            FailedPasscodeOutcome::Recorded
        );
    }
    assert_eq!(f.store.get_failed_attempts().unwrap(), 4);
    assert_eq!(f.eraser.0.load(Ordering::SeqCst), 0);
    assert_eq!(f.delegate.erased.load(Ordering::SeqCst), 0);

    assert_eq!(
        f.watchdog.register_failed_passcode().await,
        FailedPasscodeOutcome::DataErased
    );
    assert_eq!(f.eraser.0.load(Ordering::SeqCst), 1);
    assert_eq!(f.delegate.erased.load(Ordering::SeqCst), 1);
    assert_eq!(f.store.get_failed_attempts().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_passcode_locks_databases() {
    let f = fixture(LockPolicy {
        app_lock_enabled: true,
        ..Default::default()
    });

    f.watchdog.register_failed_passcode().await;
    assert_eq!(f.delegate.close_calls(), vec![false]);
    assert_eq!(f.keys.0.load(Ordering::SeqCst), 1);
    // Self-destruct disabled: nothing counted
    assert_eq!(f.store.get_failed_attempts().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_passcode_without_database_lock() {
    let f = fixture(LockPolicy {
        app_lock_enabled: true,
        lock_all_databases_on_failed_passcode: false,
        max_failed_attempts: FailedAttemptLimit::after(10),
        ..Default::default()
    });

    f.watchdog.register_failed_passcode().await;
    assert!(f.delegate.close_calls().is_empty());
    assert_eq!(f.store.get_failed_attempts().unwrap(), 1);
}

// ============================================================================
// Screen lock and lifecycle bus
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_screen_lock_engages_both_locks() {
    let f = fixture(LockPolicy {
        app_lock_enabled: true,
        app_lock_timeout: AppLockTimeout::Never,
        database_lock_timeout: DatabaseLockTimeout::Never,
        lock_app_on_screen_lock: true,
        lock_databases_on_screen_lock: true,
        ..Default::default()
    });
    f.watchdog.on_app_became_active();
    settle().await;

    f.watchdog.handle_event(LifecycleEvent::ScreenLocked);
    assert_eq!(f.delegate.show_lock_calls(), 1);
    assert_eq!(f.delegate.close_calls(), vec![false]);
}

#[tokio::test(start_paused = true)]
async fn test_bus_drives_watchdog() {
    let f = fixture(LockPolicy {
        app_lock_enabled: true,
        app_lock_timeout: AppLockTimeout::Immediately,
        ..Default::default()
    });
    let bus = LifecycleBus::default();
    let task = f.watchdog.attach(&bus);
    settle().await;

    bus.publish(LifecycleEvent::DidBecomeActive);
    settle().await;
    f.watchdog.unlock_app();

    bus.publish(LifecycleEvent::WindowDidResignKey);
    settle().await;
    assert_eq!(f.delegate.show_lock_calls(), 2);

    drop(bus);
    settle().await;
    assert!(task.is_finished());
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_dropped_delegate_makes_everything_noop() {
    let Fixture {
        watchdog,
        delegate,
        _host: host,
        settings,
        clock,
        ..
    } = fixture(idle_app_policy(60));
    watchdog.on_app_became_active();
    settle().await;

    drop(host);
    drop(delegate);

    clock.advance(Duration::from_secs(120));
    tokio::time::advance(Duration::from_secs(120)).await;
    settle().await;

    watchdog.on_app_will_resign_active();
    watchdog.on_app_became_active();
    watchdog.lock_database_now();
    settle().await;
    assert!(settings.recent_activity().is_some());
    assert!(watchdog.audit_log().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_engine_timers_do_not_fire() {
    let f = fixture(idle_app_policy(60));
    f.watchdog.on_app_became_active();
    settle().await;

    let Fixture {
        watchdog,
        delegate,
        _host,
        clock,
        ..
    } = f;
    drop(watchdog);

    clock.advance(Duration::from_secs(120));
    tokio::time::advance(Duration::from_secs(120)).await;
    settle().await;
    assert_eq!(delegate.show_lock_calls(), 0);
}
