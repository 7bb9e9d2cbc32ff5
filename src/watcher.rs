//! Directory Watcher - live synchronization of filesystem changes
//!
//! One watcher runs per watched directory as its own tokio task. Events are
//! handled strictly one at a time, and each event that survives filtering is
//! applied in its own open-mutate-commit transaction. Failures are logged and
//! the event is dropped; only [`WatchHandle::stop`] ends the task.

use std::path::Path;
use std::sync::Arc;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::WatchTarget;
use crate::error::{Result, SyncError};
use crate::event::{translate, FsEvent, FsEventKind};
use crate::exclusion::is_excluded;
use crate::remote::RemoteStore;

/// Lifecycle of a watcher task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Waiting for the next event, watch error or stop signal
    Idle,
    /// Handling exactly one event
    Processing,
    /// Stopped for good
    Stopped,
}

/// Remote action applied for an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteAction {
    Create,
    Update,
    Delete,
}

impl RemoteAction {
    /// Remote action for an event kind; `None` for permission changes
    pub fn for_kind(kind: FsEventKind) -> Option<Self> {
        match kind {
            FsEventKind::Create => Some(RemoteAction::Create),
            FsEventKind::Write => Some(RemoteAction::Update),
            FsEventKind::Rename | FsEventKind::Remove => Some(RemoteAction::Delete),
            FsEventKind::Chmod => None,
        }
    }
}

/// What happened to a single event
#[derive(Debug)]
pub enum EventOutcome {
    /// Permission or attribute change, nothing to do
    Ignored,
    /// Name matched an exclusion pattern
    Excluded,
    /// Transaction committed
    Applied(RemoteAction),
    /// Some step failed; the event is dropped
    Failed(SyncError),
}

/// Per-directory event handler
pub struct DirectoryWatcher {
    store: Arc<dyn RemoteStore>,
    target: WatchTarget,
}

impl DirectoryWatcher {
    pub fn new(store: Arc<dyn RemoteStore>, target: WatchTarget) -> Self {
        Self { store, target }
    }

    /// Attach an OS watch to the target directory and start processing its
    /// events on a new task
    pub fn start(self) -> Result<WatchHandle> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();

        let mut os_watcher = notify::recommended_watcher(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    for fs_event in translate(&event) {
                        let _ = event_tx.send(fs_event);
                    }
                }
                Err(e) => {
                    let _ = error_tx.send(SyncError::WatchRuntime(e.to_string()));
                }
            },
        )
        .map_err(|source| SyncError::WatchSetup {
            dir: self.target.directory.clone(),
            source,
        })?;

        os_watcher
            .watch(&self.target.directory, RecursiveMode::NonRecursive)
            .map_err(|source| SyncError::WatchSetup {
                dir: self.target.directory.clone(),
                source,
            })?;

        info!("Watching {}", self.target.directory.display());

        let mut handle = self.spawn(event_rx, error_rx);
        handle.os_watcher = Some(os_watcher);
        Ok(handle)
    }

    /// Process events and watch errors from the given channels on a new task
    ///
    /// This is the event loop behind [`DirectoryWatcher::start`], usable with
    /// any event source.
    pub fn spawn(
        self,
        events: mpsc::UnboundedReceiver<FsEvent>,
        errors: mpsc::UnboundedReceiver<SyncError>,
    ) -> WatchHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(WatcherState::Idle);
        let directory = self.target.directory.clone();

        let task = tokio::spawn(self.run(events, errors, stop_rx, state_tx));

        WatchHandle {
            directory,
            os_watcher: None,
            stop_tx: Some(stop_tx),
            state: state_rx,
            task,
        }
    }

    async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<FsEvent>,
        mut errors: mpsc::UnboundedReceiver<SyncError>,
        mut stop: oneshot::Receiver<()>,
        state: watch::Sender<WatcherState>,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = &mut stop => break,

                Some(event) = events.recv() => {
                    state.send_replace(WatcherState::Processing);
                    self.handle_event(&event).await;
                    state.send_replace(WatcherState::Idle);
                }

                Some(err) = errors.recv() => {
                    error!("watcher error on {}: {}", self.target.directory.display(), err);
                }
            }
        }

        state.send_replace(WatcherState::Stopped);
        debug!("Stopped watching {}", self.target.directory.display());
    }

    /// Classify one event and apply it to the remote store
    pub async fn handle_event(&self, event: &FsEvent) -> EventOutcome {
        let Some(action) = RemoteAction::for_kind(event.kind) else {
            return EventOutcome::Ignored;
        };

        let Some(name) = event.file_name() else {
            debug!("Ignoring event without a file name: {:?}", event);
            return EventOutcome::Ignored;
        };

        if is_excluded(name, &self.target.exclude) {
            info!(
                "skipping {:?} due to an exclusion pattern defined in the configuration file",
                event.path
            );
            return EventOutcome::Excluded;
        }

        info!("event received {:?} for file {:?}", event.kind.as_str(), event.path);

        match self.apply(action, name, &event.path).await {
            Ok(()) => EventOutcome::Applied(action),
            Err(e) => {
                error!("cannot sync {:?} after {} event: {}", event.path, event.kind, e);
                EventOutcome::Failed(e)
            }
        }
    }

    async fn apply(&self, action: RemoteAction, name: &str, path: &Path) -> Result<()> {
        let mut tx = self.store.begin_transaction().await?;

        match action {
            RemoteAction::Create => {
                let content = read_content(path).await?;
                let size = content.len() as u64;
                tx.create_from_file(name, content, size).await?;
            }
            RemoteAction::Update => {
                let content = read_content(path).await?;
                let size = content.len() as u64;
                tx.update_from_file(name, content, size).await?;
            }
            RemoteAction::Delete => tx.delete_by_name(name).await?,
        }

        tx.commit().await
    }
}

async fn read_content(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| SyncError::io(path, e))
}

/// Handle on a running watcher task
#[derive(Debug)]
pub struct WatchHandle {
    directory: std::path::PathBuf,
    os_watcher: Option<RecommendedWatcher>,
    stop_tx: Option<oneshot::Sender<()>>,
    state: watch::Receiver<WatcherState>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn state(&self) -> WatcherState {
        *self.state.borrow()
    }

    /// Wait until the task reaches `wanted`
    pub async fn wait_for(&mut self, wanted: WatcherState) {
        let _ = self.state.wait_for(|s| *s == wanted).await;
    }

    /// Release the OS watch and stop the task
    ///
    /// An event already being processed runs to completion first.
    pub async fn stop(mut self) -> Result<()> {
        drop(self.os_watcher.take());

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        self.task
            .await
            .map_err(|e| SyncError::WatchRuntime(format!("watcher task failed: {}", e)))
    }
}
