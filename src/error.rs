//! Error taxonomy for reconciliation and live synchronization
//!
//! Everything in the sync core returns [`SyncError`]. Orchestration code
//! (daemon, CLI, health checks) wraps these into `anyhow::Error` with context.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote store could not list its existing records
    #[error("cannot retrieve list of existing ifiles: {0}")]
    RemoteList(String),

    /// The local directory could not be listed
    #[error("cannot read content of directory {}: {source}", dir.display())]
    DirectoryRead {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot start transaction: {0}")]
    TransactionOpen(String),

    #[error("cannot upload {name:?}: {reason}")]
    Upload { name: String, reason: String },

    #[error("cannot delete {name:?}: {reason}")]
    Delete { name: String, reason: String },

    #[error("cannot commit transaction: {0}")]
    Commit(String),

    /// The remote checksum descriptor names an algorithm we cannot compute
    #[error("unsupported checksum algorithm {algorithm:?} for file {}", path.display())]
    UnsupportedAlgorithm { algorithm: String, path: PathBuf },

    /// A local file could not be opened or read
    #[error("cannot read file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The OS watch could not be attached to a directory
    #[error("cannot watch directory {}: {source}", dir.display())]
    WatchSetup {
        dir: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("watcher error: {0}")]
    WatchRuntime(String),
}

impl SyncError {
    pub fn upload(name: &str, reason: impl Into<String>) -> Self {
        SyncError::Upload {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn delete(name: &str, reason: impl Into<String>) -> Self {
        SyncError::Delete {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }
}
