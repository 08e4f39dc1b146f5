//! Local data erasure
//!
//! The self-destruct path removes imported databases, key files, backups and
//! cached master keys through a [`DataEraser`]. Individual failures are
//! logged and collected, never fatal: the wipe is finished once every item
//! has been attempted.

use crate::delegate::MasterKeyCache;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One item that could not be removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErasureFailure {
    /// What was being removed
    pub item: String,
    /// Why removal failed
    pub reason: String,
}

/// Result of an erasure pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErasureReport {
    /// Items removal was attempted for
    pub attempted: usize,
    /// Items actually removed
    pub removed: usize,
    /// Items that failed
    pub failures: Vec<ErasureFailure>,
}

impl ErasureReport {
    /// Whether every attempted item was removed
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn record_failure(&mut self, item: impl Into<String>, reason: impl ToString) {
        let failure = ErasureFailure {
            item: item.into(),
            reason: reason.to_string(),
        };
        warn!("Failed to erase {}: {}", failure.item, failure.reason);
        self.failures.push(failure);
    }
}

/// Removes all internal files and secrets of the host app
#[async_trait]
pub trait DataEraser: Send + Sync {
    /// Attempt to remove everything; resolves once every item was attempted
    async fn delete_all_internal_files_and_secrets(&self) -> ErasureReport;
}

/// Erases the contents of a set of app-owned directories
///
/// The directories themselves are kept so the app can start over empty.
pub struct FileSystemEraser {
    roots: Vec<PathBuf>,
    key_cache: Option<Arc<dyn MasterKeyCache>>,
}

impl FileSystemEraser {
    /// Erase everything under `roots`
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            key_cache: None,
        }
    }

    /// Also forget cached master keys
    pub fn with_key_cache(mut self, key_cache: Arc<dyn MasterKeyCache>) -> Self {
        self.key_cache = Some(key_cache);
        self
    }

    /// Directories this eraser empties
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    async fn erase_root(&self, root: &Path, report: &mut ErasureReport) {
        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Nothing to erase in {}", root.display());
                return;
            }
            Err(e) => {
                report.attempted += 1;
                report.record_failure(root.display().to_string(), e);
                return;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    report.record_failure(root.display().to_string(), e);
                    break;
                }
            };

            let path = entry.path();
            report.attempted += 1;
            let result = match entry.file_type().await {
                Ok(kind) if kind.is_dir() => tokio::fs::remove_dir_all(&path).await,
                Ok(_) => tokio::fs::remove_file(&path).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => report.removed += 1,
                Err(e) => report.record_failure(path.display().to_string(), e),
            }
        }
    }
}

#[async_trait]
impl DataEraser for FileSystemEraser {
    async fn delete_all_internal_files_and_secrets(&self) -> ErasureReport {
        let mut report = ErasureReport::default();

        if let Some(key_cache) = &self.key_cache {
            key_cache.erase_all_master_keys();
        }

        for root in &self.roots {
            self.erase_root(root, &mut report).await;
        }

        info!(
            "Erasure pass finished: attempted={}, removed={}, failed={}",
            report.attempted,
            report.removed,
            report.failures.len()
        );
        report
    }
}
