//! Database connection and initialization

use crate::{encryption::EncryptionKey, migrations, Error, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::Arc;

/// Connection shared by the secure store and the settings store
pub type SharedDatabase = Arc<Mutex<Database>>;

/// Database connection wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open database with encryption
    pub fn open<P: AsRef<Path>>(path: P, key: &EncryptionKey) -> Result<Self> {
        let db_exists = path.as_ref().exists();
        let path_buf = path.as_ref().to_path_buf();

        let conn = Connection::open_with_flags(
            &path_buf,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        // PRAGMA key must be the first statement on the connection, otherwise
        // SQLCipher creates the file unencrypted
        apply_key(&conn, key)?;

        // For new databases there is nothing to read yet
        if db_exists {
            let readable: std::result::Result<i64, rusqlite::Error> =
                conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get(0));

            if readable.is_err() {
                let file_size = std::fs::metadata(&path_buf).map(|m| m.len()).unwrap_or(0);
                if file_size < 100 {
                    tracing::warn!(
                        "Secure store file exists but is too small ({} bytes), may be corrupted",
                        file_size
                    );
                    return Err(Error::Encryption(
                        "Secure store file appears to be corrupted".to_string(),
                    ));
                }

                return Err(Error::Encryption(
                    "Cannot read the secure store: wrong key or corrupted file".to_string(),
                ));
            }
        }

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        verify_cipher(&conn)?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Open a private in-memory database, still keyed
    pub fn open_in_memory(key: &EncryptionKey) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_key(&conn, key)?;
        verify_cipher(&conn)?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Wrap for sharing between stores
    pub fn into_shared(self) -> SharedDatabase {
        Arc::new(Mutex::new(self))
    }

    /// Get connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin transaction
    pub fn transaction(&mut self) -> Result<rusqlite::Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }
}

fn apply_key(conn: &Connection, key: &EncryptionKey) -> Result<()> {
    let key_hex = zeroize::Zeroizing::new(hex::encode(key.as_bytes()));
    let statement = zeroize::Zeroizing::new(format!("PRAGMA key = \"x'{}'\";", key_hex.as_str()));
    // PRAGMA statements may return rows; that is not a failure
    if let Err(e) = conn.execute(statement.as_str(), []) {
        if !e.to_string().contains("Execute returned results") {
            return Err(Error::Encryption(format!(
                "Failed to apply secure store key: {}",
                e
            )));
        }
    }
    Ok(())
}

fn verify_cipher(conn: &Connection) -> Result<()> {
    let cipher_version: std::result::Result<String, rusqlite::Error> =
        conn.query_row("PRAGMA cipher_version", [], |row| row.get(0));

    match cipher_version {
        Ok(version) if !version.is_empty() => {
            tracing::debug!("SQLCipher version: {}", version);
            Ok(())
        }
        Ok(_) | Err(_) => Err(Error::Encryption(
            "SQLCipher encryption verification failed. Database may not be encrypted.".to_string(),
        )),
    }
}
