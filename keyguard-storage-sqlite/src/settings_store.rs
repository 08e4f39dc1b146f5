//! Settings provider on the encrypted database
//!
//! The lock policy is stored as a JSON document and re-read on every call.
//! Activity timestamps are coalesced to whole seconds: writes within the
//! same second are skipped, and the stored value can only be older than the
//! real one, never newer.

use crate::database::SharedDatabase;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use keyguard_core::{LockPolicy, SettingsProvider};
use parking_lot::Mutex;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, error, warn};

const LOCK_POLICY: &str = "lock_policy";
const RECENT_ACTIVITY: &str = "recent_user_activity";

/// Settings provider backed by the `settings` table
pub struct SqliteSettings {
    db: SharedDatabase,
    last_written_second: Mutex<Option<i64>>,
}

impl SqliteSettings {
    /// Create over an opened database
    pub fn new(db: SharedDatabase) -> Self {
        Self {
            db,
            last_written_second: Mutex::new(None),
        }
    }

    /// Persist a lock policy
    pub fn set_lock_policy(&self, policy: &LockPolicy) -> Result<()> {
        let json = serde_json::to_string(policy)?;
        self.write(LOCK_POLICY, &json)?;
        debug!("Lock policy updated");
        Ok(())
    }

    /// Load the stored lock policy; `None` if never stored
    pub fn load_lock_policy(&self) -> Result<Option<LockPolicy>> {
        let Some(json) = self.read(LOCK_POLICY)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&json)?))
    }

    fn read(&self, name: &str) -> Result<Option<String>> {
        let db = self.db.lock();
        let value = db
            .conn()
            .query_row("SELECT value FROM settings WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn write(&self, name: &str, value: &str) -> Result<()> {
        let db = self.db.lock();
        db.conn().execute(
            "INSERT INTO settings (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value",
            params![name, value],
        )?;
        Ok(())
    }

    fn load_recent_activity(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.read(RECENT_ACTIVITY)? else {
            return Ok(None);
        };
        let secs: i64 = raw
            .parse()
            .map_err(|_| Error::InvalidValue(format!("activity timestamp {:?}", raw)))?;
        Ok(DateTime::<Utc>::from_timestamp(secs, 0))
    }
}

impl SettingsProvider for SqliteSettings {
    fn lock_policy(&self) -> LockPolicy {
        match self.load_lock_policy() {
            Ok(Some(policy)) => policy,
            Ok(None) => LockPolicy::default(),
            Err(e) => {
                warn!("Cannot read lock policy, failing closed: {}", e);
                LockPolicy::fail_closed()
            }
        }
    }

    fn recent_activity(&self) -> Option<DateTime<Utc>> {
        match self.load_recent_activity() {
            Ok(at) => at,
            Err(e) => {
                // Unknown activity reads as "now" upstream; the epoch makes every timeout due
                warn!("Cannot read recent activity, treating as long idle: {}", e);
                DateTime::<Utc>::from_timestamp(0, 0)
            }
        }
    }

    fn set_recent_activity(&self, at: DateTime<Utc>) {
        let second = at.timestamp();
        let mut last = self.last_written_second.lock();
        if *last == Some(second) {
            return;
        }

        match self.write(RECENT_ACTIVITY, &second.to_string()) {
            Ok(()) => *last = Some(second),
            Err(e) => error!("Failed to record user activity: {}", e),
        }
    }
}
