//! ifilesentry - Keep BIG-IP iFiles in sync with local directories
//!
//! ifilesentry mirrors the regular files of one or more local directories into
//! the iFile store of an F5 BIG-IP LTM module. Each directory is first
//! reconciled in a single transaction, then followed live: every filesystem
//! change is pushed to the device in its own transaction.
//!
//! ## Core Features
//!
//! - **Reconciliation**: create missing iFiles and update the ones whose checksum differs
//! - **Live Sync**: create, update and delete iFiles as files change on disk
//! - **Exclusions**: per-directory glob patterns for files that are never synced
//! - **Transactions**: every batch of changes is committed atomically on the device
//! - **Daemon Mode**: background service with PID file management
//!
//! ## Modules
//!
//! - [`scanner`]: one-shot reconciliation of a directory
//! - [`watcher`]: live synchronization of filesystem events
//! - [`remote`]: remote store traits and the iControl REST client
//! - [`config`]: configuration management and parsing

pub mod checksum;
pub mod config;
pub mod daemon;
pub mod error;
pub mod event;
pub mod exclusion;
pub mod health;
pub mod remote;
pub mod scanner;
pub mod watcher;

pub use config::{Config, WatchTarget};
pub use daemon::Daemon;
pub use error::SyncError;
pub use health::HealthCheck;
pub use remote::{BigIpClient, RemoteFileRecord, RemoteStore, Transaction};
pub use scanner::{ScanReport, Scanner};
pub use watcher::{DirectoryWatcher, WatchHandle, WatcherState};
