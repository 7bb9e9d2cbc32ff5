//! Reconciliation Scanner - one-shot diff between a directory and the remote store
//!
//! A scan brings the remote store up to date with what is already on disk:
//! local files without a remote record are created, files whose checksum
//! differs from the remote descriptor are updated, and everything is applied in
//! a single transaction. Remote records without a local file are left alone;
//! removals are only ever carried by live filesystem events.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::checksum::same_revision;
use crate::config::WatchTarget;
use crate::error::{Result, SyncError};
use crate::exclusion::is_excluded;
use crate::remote::{RemoteFileRecord, RemoteStore};

/// A regular, non-empty, non-excluded file eligible for synchronization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileEntry {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Mutation the scan decided on for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Create,
    Update,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChange {
    pub name: String,
    pub action: ChangeAction,
}

/// Outcome of a successful scan
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub directory: PathBuf,
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    /// Whether a transaction was committed (false when nothing changed)
    pub committed: bool,
}

impl ScanReport {
    pub fn mutation_count(&self) -> usize {
        self.created.len() + self.updated.len()
    }
}

pub struct Scanner {
    store: Arc<dyn RemoteStore>,
}

impl Scanner {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Reconcile `target` with the remote store in one transaction
    ///
    /// Any error aborts the scan. Mutations already issued stay in the
    /// uncommitted transaction, which is discarded.
    pub async fn scan(&self, target: &WatchTarget) -> Result<ScanReport> {
        let dir = &target.directory;
        info!("Scanning {}", dir.display());

        let remote = self.remote_index().await?;
        let entries = list_local_entries(dir, &target.exclude).await?;

        let mut tx = self.store.begin_transaction().await?;
        let mut report = ScanReport {
            directory: dir.clone(),
            ..Default::default()
        };

        for entry in entries {
            match diff_entry(&entry, &remote).await? {
                Some(ChangeAction::Create) => {
                    let content = read_content(&entry.path).await?;
                    let size = content.len() as u64;
                    tx.create_from_file(&entry.name, content, size).await?;
                    info!("Scheduled creation of {}", entry.name);
                    report.created.push(entry.name);
                }
                Some(ChangeAction::Update) => {
                    let content = read_content(&entry.path).await?;
                    let size = content.len() as u64;
                    tx.update_from_file(&entry.name, content, size).await?;
                    info!("Scheduled update of {}", entry.name);
                    report.updated.push(entry.name);
                }
                None => report.unchanged.push(entry.name),
            }
        }

        if report.mutation_count() > 0 {
            tx.commit().await?;
            report.committed = true;
            info!(
                "Committed {} created and {} updated file(s) for {}",
                report.created.len(),
                report.updated.len(),
                dir.display()
            );
        } else {
            debug!("{} is already in sync", dir.display());
        }

        Ok(report)
    }

    /// Compute the changes a scan of `target` would make without touching
    /// the remote store
    pub async fn plan(&self, target: &WatchTarget) -> Result<Vec<PlannedChange>> {
        let remote = self.remote_index().await?;
        let entries = list_local_entries(&target.directory, &target.exclude).await?;

        let mut changes = Vec::new();
        for entry in entries {
            if let Some(action) = diff_entry(&entry, &remote).await? {
                changes.push(PlannedChange {
                    name: entry.name,
                    action,
                });
            }
        }
        Ok(changes)
    }

    async fn remote_index(&self) -> Result<HashMap<String, RemoteFileRecord>> {
        let records = self.store.list_records().await?;
        debug!("Remote store holds {} record(s)", records.len());

        // Later duplicates replace earlier ones.
        Ok(records
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect())
    }
}

async fn diff_entry(
    entry: &LocalFileEntry,
    remote: &HashMap<String, RemoteFileRecord>,
) -> Result<Option<ChangeAction>> {
    match remote.get(&entry.name) {
        None => Ok(Some(ChangeAction::Create)),
        Some(record) => {
            if same_revision(&record.checksum, &entry.path).await? {
                Ok(None)
            } else {
                Ok(Some(ChangeAction::Update))
            }
        }
    }
}

async fn read_content(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| SyncError::io(path, e))
}

/// List the files of `dir` that take part in synchronization, sorted by name
///
/// Subdirectories, empty files and excluded names are skipped. So are entries
/// that vanish while listing and symlinks whose target does not exist.
pub async fn list_local_entries<S: AsRef<str>>(
    dir: &Path,
    exclude: &[S],
) -> Result<Vec<LocalFileEntry>> {
    let read_error = |source| SyncError::DirectoryRead {
        dir: dir.to_path_buf(),
        source,
    };

    let mut read_dir = tokio::fs::read_dir(dir).await.map_err(read_error)?;
    let mut entries = Vec::new();

    while let Some(entry) = read_dir.next_entry().await.map_err(read_error)? {
        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn!("Skipping non UTF-8 file name {}", path.display());
            continue;
        };

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Skipping {}: {}", path.display(), e);
                continue;
            }
            Err(e) => return Err(read_error(e)),
        };
        if !metadata.is_file() || metadata.len() == 0 {
            continue;
        }
        if is_excluded(&name, exclude) {
            debug!("Skipping excluded file {}", name);
            continue;
        }

        entries.push(LocalFileEntry {
            name,
            path,
            size: metadata.len(),
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}
