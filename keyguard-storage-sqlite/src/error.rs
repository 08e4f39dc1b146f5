//! Error types

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Encryption error
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value could not be decoded
    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for keyguard_core::Error {
    fn from(err: Error) -> Self {
        match err {
            // Wrong or missing key: the store exists but cannot be read right now
            Error::Encryption(msg) => keyguard_core::Error::StorageUnavailable(msg),
            Error::Database(rusqlite::Error::SqliteFailure(code, msg))
                if code.code == rusqlite::ErrorCode::NotADatabase =>
            {
                keyguard_core::Error::StorageUnavailable(
                    msg.unwrap_or_else(|| "file is not a database".to_string()),
                )
            }
            other => keyguard_core::Error::Storage(other.to_string()),
        }
    }
}
