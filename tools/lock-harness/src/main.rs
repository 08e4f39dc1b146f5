//! CLI harness for exercising the session-security engine
//!
//! This tool allows testing:
//! - Scripted lifecycle sequences on a simulated clock
//! - Self-destruct against a real data directory
//! - Reboot detection against the OS boot time

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use keyguard_core::{
    BootTimeSource, Clock, FailedAttemptLimit, FileSystemEraser, LifecycleEvent, LockPolicy,
    ManualBootTime, ManualClock, MemoryCounterStore, MemorySettings, RebootDetector,
    SecurityAuditLog, SelfDestructCounter, SystemBootTime, Watchdog, WatchdogConfig,
    WatchdogDelegate,
};
use keyguard_storage_sqlite::{
    generate_salt, Database, EncryptionKey, SharedDatabase, SqliteSecureStore,
};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "lock-harness")]
#[command(about = "Keyguard lock engine testing harness", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a lifecycle script against the watchdog on a simulated clock
    Simulate {
        /// Lock policy as inline JSON or a path to a JSON file
        #[arg(short, long)]
        policy: Option<String>,

        /// Steps separated by commas or spaces, e.g. "active,advance:60,resign"
        #[arg(short, long)]
        script: String,
    },

    /// Register failed passcode attempts against a data directory
    Attempts {
        /// Secure store database
        #[arg(long)]
        db: PathBuf,

        /// Directory erased when the limit is reached
        #[arg(long)]
        data_dir: PathBuf,

        /// Secure store passphrase
        #[arg(long, env = "KEYGUARD_PASSPHRASE")]
        passphrase: String,

        /// Self-destruct threshold, 0 disables
        #[arg(short, long, default_value = "10")]
        limit: u32,

        /// Number of failed attempts to register
        #[arg(short, long, default_value = "1")]
        count: u32,

        /// Register a successful unlock instead
        #[arg(long)]
        reset: bool,
    },

    /// Compare the OS boot time with the stored one
    RebootCheck {
        /// Secure store database
        #[arg(long)]
        db: PathBuf,

        /// Secure store passphrase
        #[arg(long, env = "KEYGUARD_PASSPHRASE")]
        passphrase: String,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate { policy, script } => {
            let policy = load_policy(policy.as_deref())?;
            let steps = parse_script(&script)?;
            run_simulation(policy, steps)?;
        }
        Commands::Attempts {
            db,
            data_dir,
            passphrase,
            limit,
            count,
            reset,
        } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run_attempts(db, data_dir, passphrase, limit, count, reset))?;
        }
        Commands::RebootCheck { db, passphrase } => {
            run_reboot_check(&db, &passphrase)?;
        }
    }

    Ok(())
}

// ============================================================================
// Simulation
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Step {
    Event(LifecycleEvent),
    Touch,
    Suppress,
    Unlock,
    Fail,
    LockDatabase,
    LockApp,
    OpenDatabase,
    Reboot,
    Advance(Duration),
}

impl FromStr for Step {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        if let Some(secs) = s.strip_prefix("advance:") {
            let secs: f64 = secs
                .parse()
                .with_context(|| format!("Invalid duration in step {:?}", s))?;
            if !secs.is_finite() || secs < 0.0 {
                bail!("Invalid duration in step {:?}", s);
            }
            return Ok(Step::Advance(Duration::from_secs_f64(secs)));
        }

        let step = match s {
            "active" => Step::Event(LifecycleEvent::DidBecomeActive),
            "resign" => Step::Event(LifecycleEvent::WillResignActive),
            "screen-lock" => Step::Event(LifecycleEvent::ScreenLocked),
            "screen-unlock" => Step::Event(LifecycleEvent::ScreenUnlocked),
            "key" => Step::Event(LifecycleEvent::WindowDidBecomeKey),
            "resign-key" => Step::Event(LifecycleEvent::WindowDidResignKey),
            "touch" => Step::Touch,
            "suppress" => Step::Suppress,
            "unlock" => Step::Unlock,
            "fail" => Step::Fail,
            "lock-db" => Step::LockDatabase,
            "lock-app" => Step::LockApp,
            "open-db" => Step::OpenDatabase,
            "reboot" => Step::Reboot,
            other => bail!("Unknown step {:?}", other),
        };
        Ok(step)
    }
}

fn parse_script(script: &str) -> anyhow::Result<Vec<Step>> {
    let steps = script
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(Step::from_str)
        .collect::<anyhow::Result<Vec<_>>>()?;
    if steps.is_empty() {
        bail!("Script has no steps");
    }
    Ok(steps)
}

fn load_policy(arg: Option<&str>) -> anyhow::Result<LockPolicy> {
    let Some(arg) = arg else {
        return Ok(LockPolicy::default());
    };
    let json = if arg.trim_start().starts_with('{') {
        arg.to_string()
    } else {
        std::fs::read_to_string(arg).with_context(|| format!("Cannot read policy file {}", arg))?
    };
    Ok(LockPolicy::from_json(&json)?)
}

/// Prints every command the engine issues, stamped with simulated time
struct PrintingDelegate {
    clock: Arc<ManualClock>,
    start: DateTime<Utc>,
    lock_visible: AtomicBool,
    cover_visible: AtomicBool,
    database_open: AtomicBool,
}

impl PrintingDelegate {
    fn new(clock: Arc<ManualClock>) -> Self {
        let start = clock.now();
        Self {
            clock,
            start,
            lock_visible: AtomicBool::new(false),
            cover_visible: AtomicBool::new(false),
            database_open: AtomicBool::new(true),
        }
    }

    fn elapsed(&self) -> f64 {
        (self.clock.now() - self.start).num_milliseconds() as f64 / 1000.0
    }

    fn report(&self, action: &str) {
        println!("[t+{:>9.1}s]   {}", self.elapsed(), action);
    }
}

impl WatchdogDelegate for PrintingDelegate {
    fn is_app_lock_visible(&self) -> bool {
        self.lock_visible.load(Ordering::SeqCst)
    }

    fn show_app_lock(&self) {
        self.lock_visible.store(true, Ordering::SeqCst);
        self.report("show app lock");
    }

    fn hide_app_lock(&self) {
        self.lock_visible.store(false, Ordering::SeqCst);
        self.report("hide app lock");
    }

    fn is_app_cover_visible(&self) -> bool {
        self.cover_visible.load(Ordering::SeqCst)
    }

    fn show_app_cover(&self) {
        self.cover_visible.store(true, Ordering::SeqCst);
        self.report("show cover");
    }

    fn hide_app_cover(&self) {
        self.cover_visible.store(false, Ordering::SeqCst);
        self.report("hide cover");
    }

    fn must_close_database(&self, animate: bool) {
        self.database_open.store(false, Ordering::SeqCst);
        self.report(&format!("close database (animate={})", animate));
    }

    fn has_open_database(&self) -> bool {
        self.database_open.load(Ordering::SeqCst)
    }

    fn did_erase_all_data(&self) {
        self.database_open.store(false, Ordering::SeqCst);
        self.report("all data erased");
    }
}

fn run_simulation(policy: LockPolicy, steps: Vec<Step>) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()?;
    runtime.block_on(simulate(policy, steps))
}

async fn simulate(policy: LockPolicy, steps: Vec<Step>) -> anyhow::Result<()> {
    let start = Utc::now();
    let clock = Arc::new(ManualClock::new(start));
    let boot = Arc::new(ManualBootTime::new(Some(start - chrono::Duration::hours(1))));
    let audit = SecurityAuditLog::default();

    let config = WatchdogConfig::new(
        Arc::new(MemorySettings::new(policy)),
        Arc::new(MemoryCounterStore::new()),
        Arc::new(FileSystemEraser::new(Vec::new())),
    )
    .with_clock(clock.clone())
    .with_boot_time(boot.clone())
    .with_audit_log(audit.clone());
    let watchdog = Watchdog::new(config)?;

    let delegate = Arc::new(PrintingDelegate::new(clock.clone()));
    let host: Arc<dyn WatchdogDelegate> = delegate.clone();
    watchdog.set_delegate(&host);

    for step in steps {
        println!("[t+{:>9.1}s] > {:?}", delegate.elapsed(), step);
        match step {
            Step::Event(event) => watchdog.handle_event(event),
            Step::Touch => watchdog.restart(),
            Step::Suppress => watchdog.ignore_minimization_once(),
            Step::Unlock => watchdog.unlock_app(),
            Step::Fail => {
                let outcome = watchdog.register_failed_passcode().await;
                delegate.report(&format!("failed passcode: {:?}", outcome));
            }
            Step::LockDatabase => watchdog.lock_database_now(),
            Step::LockApp => watchdog.lock_app_now(),
            Step::OpenDatabase => delegate.database_open.store(true, Ordering::SeqCst),
            Step::Reboot => boot.set(Some(clock.now())),
            Step::Advance(by) => advance(&clock, by).await,
        }
        settle().await;
    }

    println!();
    println!("Audit log:");
    for event in audit.snapshot() {
        let offset = (event.at - start).num_milliseconds() as f64 / 1000.0;
        println!("  t+{:>9.1}s  {:?}", offset, event.kind);
    }
    Ok(())
}

/// Move the wall clock and the timer clock together, one second at a time,
/// so timers observe the wall time they were scheduled for
async fn advance(clock: &ManualClock, by: Duration) {
    const SLICE: Duration = Duration::from_secs(1);
    let mut remaining = by;
    while !remaining.is_zero() {
        let step = remaining.min(SLICE);
        clock.advance(step);
        tokio::time::advance(step).await;
        settle().await;
        remaining -= step;
    }
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Secure store commands
// ============================================================================

fn open_database(db: &Path, passphrase: &str) -> anyhow::Result<SharedDatabase> {
    let salt_path = db.with_extension("salt");
    let salt = if salt_path.exists() {
        let raw = std::fs::read_to_string(&salt_path)
            .with_context(|| format!("Cannot read {}", salt_path.display()))?;
        hex::decode(raw.trim()).context("Salt file is not valid hex")?
    } else {
        let salt = generate_salt();
        std::fs::write(&salt_path, hex::encode(salt))
            .with_context(|| format!("Cannot write {}", salt_path.display()))?;
        info!("Created new salt at {}", salt_path.display());
        salt.to_vec()
    };

    let key = EncryptionKey::from_passphrase(passphrase, &salt)?;
    Ok(Database::open(db, &key)?.into_shared())
}

async fn run_attempts(
    db: PathBuf,
    data_dir: PathBuf,
    passphrase: String,
    limit: u32,
    count: u32,
    reset: bool,
) -> anyhow::Result<()> {
    if db.starts_with(&data_dir) {
        bail!("The secure store must live outside the erased data directory");
    }

    let store = Arc::new(SqliteSecureStore::new(open_database(&db, &passphrase)?));
    let eraser = Arc::new(FileSystemEraser::new(vec![data_dir]).with_key_cache(store.clone()));
    let counter = SelfDestructCounter::new(store, eraser);

    if reset {
        counter.register_successful_unlock()?;
        println!("Failed attempts: 0");
        return Ok(());
    }

    let limit = FailedAttemptLimit::after(limit);
    for attempt in 1..=count {
        let wiped = counter
            .register_failed_attempt(limit, |report| {
                println!(
                    "Erased: attempted={}, removed={}, failed={}",
                    report.attempted,
                    report.removed,
                    report.failures.len()
                );
                for failure in &report.failures {
                    println!("  {}: {}", failure.item, failure.reason);
                }
            })
            .await;

        if wiped {
            warn!("Attempt {} reached the limit, all local data erased", attempt);
            break;
        }
    }

    println!("Failed attempts: {}", counter.failed_attempts()?);
    Ok(())
}

fn run_reboot_check(db: &Path, passphrase: &str) -> anyhow::Result<()> {
    let store = Arc::new(SqliteSecureStore::new(open_database(db, passphrase)?));
    let boot_time = Arc::new(SystemBootTime);

    match boot_time.current_boot_time() {
        Some(at) => println!("OS boot time: {}", at),
        None => println!("OS boot time: unavailable"),
    }

    let outcome = RebootDetector::new(store, boot_time).check();
    println!(
        "Outcome: {:?} (treated as reboot: {})",
        outcome,
        outcome.assumes_reboot()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_script() {
        let steps = parse_script("active, advance:1.5 resign,,fail").unwrap();
        assert_eq!(steps.len(), 4);
        assert!(matches!(steps[0], Step::Event(LifecycleEvent::DidBecomeActive)));
        assert!(matches!(steps[1], Step::Advance(d) if d == Duration::from_millis(1500)));
        assert!(matches!(steps[3], Step::Fail));
    }

    #[test]
    fn test_parse_script_rejects_unknown() {
        assert!(parse_script("active,explode").is_err());
        assert!(parse_script("advance:-3").is_err());
        assert!(parse_script(" , ").is_err());
    }

    #[test]
    fn test_inline_policy() {
        let policy = load_policy(Some(r#"{"app_lock_enabled": true, "app_lock_timeout": 30}"#)).unwrap();
        assert!(policy.app_lock_enabled);
        assert!(load_policy(None).unwrap() == LockPolicy::default());
    }
}
