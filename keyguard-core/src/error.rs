//! Error types for the session-security engine

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Engine errors
///
/// None of these reach the user directly. Callers inside the engine resolve
/// them toward more locking and log the decision.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Secure storage read or write failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Secure storage is temporarily inaccessible (device locked, key unavailable)
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Local data erasure failed
    #[error("Erasure error: {0}")]
    Erasure(String),

    /// Invalid lock policy document
    #[error("Policy error: {0}")]
    Policy(String),

    /// No async runtime to schedule timers on
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error came from the secure store.
    ///
    /// Storage failures are the ones the engine resolves conservatively
    /// (assume reboot, keep counting) instead of propagating.
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::StorageUnavailable(_))
    }
}
