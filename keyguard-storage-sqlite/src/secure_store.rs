//! SQLCipher-backed Secure Counter Store and master-key cache
//!
//! Boot timestamp and failed-attempt count live in `secure_values`; derived
//! database master keys live in `master_keys`. `erase_all` clears both tables
//! in one transaction.

use crate::database::SharedDatabase;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use keyguard_core::{MasterKeyCache, SecureCounterStore};
use rusqlite::{params, OptionalExtension};
use tracing::{debug, error, info};
use zeroize::Zeroizing;

const BOOT_TIMESTAMP: &str = "device_boot_timestamp";
const FAILED_ATTEMPTS: &str = "failed_passcode_attempts";

/// Secure counter store and master-key cache on the encrypted database
#[derive(Clone)]
pub struct SqliteSecureStore {
    db: SharedDatabase,
}

impl SqliteSecureStore {
    /// Create a store over an opened database
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    fn read_value(&self, name: &str) -> Result<Option<String>> {
        let db = self.db.lock();
        let value = db
            .conn()
            .query_row(
                "SELECT value FROM secure_values WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn write_value(&self, name: &str, value: &str) -> Result<()> {
        let db = self.db.lock();
        db.conn().execute(
            "INSERT INTO secure_values (name, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![name, value, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn load_boot_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.read_value(BOOT_TIMESTAMP)? else {
            return Ok(None);
        };
        let millis: i64 = raw
            .parse()
            .map_err(|_| Error::InvalidValue(format!("boot timestamp {:?}", raw)))?;
        DateTime::<Utc>::from_timestamp_millis(millis)
            .map(Some)
            .ok_or_else(|| Error::InvalidValue(format!("boot timestamp {}", millis)))
    }

    fn load_failed_attempts(&self) -> Result<u32> {
        match self.read_value(FAILED_ATTEMPTS)? {
            None => Ok(0),
            Some(raw) => raw
                .parse()
                .map_err(|_| Error::InvalidValue(format!("failed attempts {:?}", raw))),
        }
    }

    fn wipe(&self) -> Result<()> {
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        let values = tx.execute("DELETE FROM secure_values", [])?;
        let keys = tx.execute("DELETE FROM master_keys", [])?;
        tx.commit()?;
        info!(
            "Secure store erased ({} values, {} master keys)",
            values, keys
        );
        Ok(())
    }

    /// Cache a derived master key for a database
    pub fn store_master_key(&self, database_ref: &str, key: &[u8]) -> Result<()> {
        let db = self.db.lock();
        db.conn().execute(
            "INSERT INTO master_keys (database_ref, key_material, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(database_ref) DO UPDATE SET key_material = excluded.key_material,
                 created_at = excluded.created_at",
            params![database_ref, key, Utc::now().timestamp()],
        )?;
        debug!("Cached master key for {}", database_ref);
        Ok(())
    }

    /// Cached master key for a database, if any
    pub fn master_key(&self, database_ref: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let db = self.db.lock();
        let key: Option<Vec<u8>> = db
            .conn()
            .query_row(
                "SELECT key_material FROM master_keys WHERE database_ref = ?1",
                [database_ref],
                |row| row.get(0),
            )
            .optional()?;
        Ok(key.map(Zeroizing::new))
    }

    /// Forget the cached master key of one database
    pub fn remove_master_key(&self, database_ref: &str) -> Result<bool> {
        let db = self.db.lock();
        let removed = db
            .conn()
            .execute("DELETE FROM master_keys WHERE database_ref = ?1", [database_ref])?;
        Ok(removed > 0)
    }

    /// Number of cached master keys
    pub fn master_key_count(&self) -> Result<usize> {
        let db = self.db.lock();
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM master_keys", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

impl SecureCounterStore for SqliteSecureStore {
    fn get_boot_timestamp(&self) -> keyguard_core::Result<Option<DateTime<Utc>>> {
        Ok(self.load_boot_timestamp()?)
    }

    fn set_boot_timestamp(&self, at: DateTime<Utc>) -> keyguard_core::Result<()> {
        Ok(self.write_value(BOOT_TIMESTAMP, &at.timestamp_millis().to_string())?)
    }

    fn get_failed_attempts(&self) -> keyguard_core::Result<u32> {
        Ok(self.load_failed_attempts()?)
    }

    fn set_failed_attempts(&self, count: u32) -> keyguard_core::Result<()> {
        Ok(self.write_value(FAILED_ATTEMPTS, &count.to_string())?)
    }

    fn erase_all(&self) -> keyguard_core::Result<()> {
        Ok(self.wipe()?)
    }
}

impl MasterKeyCache for SqliteSecureStore {
    fn erase_all_master_keys(&self) {
        let db = self.db.lock();
        match db.conn().execute("DELETE FROM master_keys", []) {
            Ok(removed) => debug!("Erased {} cached master keys", removed),
            Err(e) => error!("Failed to erase cached master keys: {}", e),
        }
    }
}
