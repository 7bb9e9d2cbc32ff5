//! Daemon Infrastructure - Background service for live iFile synchronization
//!
//! This module runs the scan-then-watch cycle for every configured directory,
//! manages the PID file and waits for a shutdown signal before stopping all
//! watchers.

use crate::config::{Config, DaemonConfig};
use crate::error::SyncError;
use crate::remote::RemoteStore;
use crate::scanner::Scanner;
use crate::watcher::{DirectoryWatcher, WatchHandle};
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Daemon state and control
pub struct Daemon {
    config: Arc<Config>,
    store: Arc<dyn RemoteStore>,
    pid_file_path: Option<PathBuf>,
}

/// Outcome of starting every configured directory
pub struct Startup {
    /// Running watchers, in configuration order
    pub handles: Vec<WatchHandle>,
    /// Directories that could not be scanned or watched
    pub failures: Vec<(PathBuf, SyncError)>,
}

impl Daemon {
    /// Create a new daemon instance
    pub fn new(config: Config, store: Arc<dyn RemoteStore>) -> Result<Self> {
        let pid_file_path = pid_file_path(&config.daemon)?;

        Ok(Self {
            config: Arc::new(config),
            store,
            pid_file_path,
        })
    }

    /// Start the daemon in the foreground and block until a shutdown signal
    pub async fn run(&self) -> Result<()> {
        info!("Starting ifilesentry daemon");

        self.write_pid_file().context("Failed to write PID file")?;

        let result = self.serve().await;

        self.cleanup().context("Failed to cleanup daemon")?;
        info!("bye.");

        result
    }

    async fn serve(&self) -> Result<()> {
        let startup = self.start_watching().await;

        if startup.handles.is_empty() {
            bail!(
                "no directory could be monitored ({} failed)",
                startup.failures.len()
            );
        }

        info!("Monitoring {} director(y/ies)", startup.handles.len());

        wait_for_shutdown_signal().await?;
        info!("Shutdown signal received, stopping watchers...");

        stop_all(startup.handles).await;
        Ok(())
    }

    /// Reconcile every directory, then start its watcher
    ///
    /// A directory whose scan fails is not watched. The others carry on.
    pub async fn start_watching(&self) -> Startup {
        let scanner = Scanner::new(self.store.clone());
        let mut startup = Startup {
            handles: Vec::new(),
            failures: Vec::new(),
        };

        for target in self.config.watch_targets() {
            let directory = target.directory.clone();

            if let Err(e) = scanner.scan(&target).await {
                error!("{}", e);
                error!("{} will not be monitored", directory.display());
                startup.failures.push((directory, e));
                continue;
            }

            match DirectoryWatcher::new(self.store.clone(), target).start() {
                Ok(handle) => startup.handles.push(handle),
                Err(e) => {
                    error!("{}", e);
                    startup.failures.push((directory, e));
                }
            }
        }

        startup
    }

    /// Write PID file for daemon process management
    fn write_pid_file(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            let pid = std::process::id();

            if let Some(parent) = pid_file.parent() {
                fs::create_dir_all(parent).context("Failed to create PID file directory")?;
            }

            fs::write(pid_file, pid.to_string()).context("Failed to write PID file")?;

            info!("PID file written: {} (PID: {})", pid_file.display(), pid);
        }

        Ok(())
    }

    /// Remove PID file
    fn cleanup(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            if pid_file.exists() {
                fs::remove_file(pid_file).context("Failed to remove PID file")?;
                debug!("PID file removed: {}", pid_file.display());
            }
        }

        Ok(())
    }
}

/// Stop every watcher, letting in-flight events finish
pub async fn stop_all(handles: Vec<WatchHandle>) {
    let results = futures::future::join_all(handles.into_iter().map(|h| async move {
        let directory = h.directory().to_path_buf();
        (directory, h.stop().await)
    }))
    .await;

    for (directory, result) in results {
        if let Err(e) = result {
            warn!("Watcher for {} did not stop cleanly: {}", directory.display(), e);
        }
    }
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("Failed to listen for ctrl-c")?;
                debug!("SIGINT received");
            }
            _ = terminate.recv() => debug!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for ctrl-c")?;
    }

    Ok(())
}

/// Detach from the terminal (Unix platforms)
///
/// Must run before the async runtime is built. The working directory becomes
/// `/`, so configured paths need to be absolute by then.
#[cfg(unix)]
pub fn daemonize(config: &DaemonConfig) -> Result<()> {
    use daemonize::Daemonize;

    let mut daemonize = Daemonize::new();

    if let Some(pid_path) = pid_file_path(config)? {
        if let Some(parent) = pid_path.parent() {
            fs::create_dir_all(parent).context("Failed to create PID file directory")?;
        }
        daemonize = daemonize.pid_file(pid_path);
    }

    if !config.log_file.is_empty() {
        let expanded_path =
            shellexpand::full(&config.log_file).context("Failed to expand log file path")?;
        let log_path = PathBuf::from(expanded_path.as_ref());

        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent).context("Failed to create log file directory")?;
        }

        let log_file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .context("Failed to open log file")?;

        daemonize = daemonize.stdout(log_file.try_clone()?).stderr(log_file);
    }

    daemonize.start().context("Failed to daemonize process")?;

    Ok(())
}

/// Stop a running daemon by sending SIGTERM to the PID in the PID file
pub fn stop(config: &Config) -> Result<()> {
    let Some(pid_file) = pid_file_path(&config.daemon)? else {
        warn!("No PID file configured, cannot stop daemon");
        return Ok(());
    };

    if !pid_file.exists() {
        warn!("PID file not found, daemon may not be running");
        return Ok(());
    }

    let pid = read_pid(&pid_file)?;

    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        signal::kill(Pid::from_raw(pid), Signal::SIGTERM)
            .context("Failed to send SIGTERM to daemon process")?;
    }

    #[cfg(not(unix))]
    {
        warn!("Daemon stop not implemented for this platform");
    }

    info!("Shutdown signal sent to daemon process {}", pid);
    Ok(())
}

/// Check if daemon is currently running by checking PID file
///
/// A PID file pointing at a process that no longer exists is removed.
pub fn is_daemon_running(config: &Config) -> Result<bool> {
    let Some(pid_file) = pid_file_path(&config.daemon)? else {
        return Ok(false);
    };

    if !pid_file.exists() {
        return Ok(false);
    }

    let pid = read_pid(&pid_file)?;

    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal;
        use nix::unistd::Pid;

        match signal::kill(Pid::from_raw(pid), None) {
            Ok(_) => Ok(true),
            Err(Errno::ESRCH) => {
                let _ = fs::remove_file(&pid_file);
                Ok(false)
            }
            // EPERM: the process exists but belongs to someone else
            Err(_) => Ok(true),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        Ok(true)
    }
}

/// PID file location, `None` when not configured
pub fn pid_file_path(config: &DaemonConfig) -> Result<Option<PathBuf>> {
    if config.pid_file.is_empty() {
        return Ok(None);
    }

    let expanded_path =
        shellexpand::full(&config.pid_file).context("Failed to expand PID file path")?;
    Ok(Some(PathBuf::from(expanded_path.as_ref())))
}

fn read_pid(pid_file: &std::path::Path) -> Result<i32> {
    let pid_str = fs::read_to_string(pid_file).context("Failed to read PID file")?;
    pid_str.trim().parse().context("Invalid PID in PID file")
}
