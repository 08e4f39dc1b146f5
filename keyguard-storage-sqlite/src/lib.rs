//! Encrypted SQLite storage for Keyguard
//!
//! Backs the session-security engine with a SQLCipher database:
//!
//! - **Secure Counter Store**: boot timestamp and failed-attempt count
//! - **Master Key Cache**: derived database keys, dropped on timeout locks
//! - **Settings**: lock policy document and the recent-activity timestamp
//! - **Key Derivation**: Argon2id with 64 MiB memory, 3 iterations, 4 lanes
//!
//! One connection is shared by every store; see [`SharedDatabase`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod database;
pub mod encryption;
pub mod error;
pub mod migrations;
pub mod secure_store;
pub mod settings_store;

pub use database::{Database, SharedDatabase};
pub use encryption::{generate_salt, EncryptionKey};
pub use error::{Error, Result};
pub use secure_store::SqliteSecureStore;
pub use settings_store::SqliteSettings;
