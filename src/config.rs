use anyhow::{anyhow, bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure for ifilesentry
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// BIG-IP connection and authentication settings
    #[serde(default)]
    pub bigip: BigIpConfig,

    /// Directories to keep in sync, in startup order
    #[serde(default)]
    pub watch: Vec<WatchConfig>,

    /// Daemon configuration
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// BIG-IP iControl REST settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BigIpConfig {
    /// Base URL of the management interface
    #[serde(default)]
    pub url: String,

    /// Authentication method
    #[serde(default = "default_auth_method")]
    pub auth_method: String, // "basic", "token"

    #[serde(default)]
    pub user: String,

    /// Password; when empty it is read from `password_env`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    /// Environment variable holding the password
    #[serde(default = "default_password_env")]
    pub password_env: String,

    /// Verify the device TLS certificate
    #[serde(default = "default_true")]
    pub ssl_check: bool,

    /// Login provider used for token authentication
    #[serde(default = "default_login_provider_name")]
    pub login_provider_name: String,

    /// Administrative partition holding the iFiles
    #[serde(default = "default_partition")]
    pub partition: String,

    /// Timeout for a single HTTP request in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

/// One watched directory
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    pub directory: String,

    /// Glob patterns for file names that are never synchronized
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Daemon configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DaemonConfig {
    /// PID file location
    #[serde(default = "default_pid_file")]
    pub pid_file: String,

    /// Log file location
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact", "pretty", "full"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

/// A directory together with its exclusion patterns, as handed to the
/// scanner and the watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub directory: PathBuf,
    pub exclude: Vec<String>,
}

impl WatchTarget {
    pub fn new(directory: impl Into<PathBuf>, exclude: Vec<String>) -> Self {
        Self {
            directory: directory.into(),
            exclude,
        }
    }
}

// Default value functions
fn default_auth_method() -> String {
    "basic".to_string()
}
fn default_password_env() -> String {
    "IFILESENTRY_PASSWORD".to_string()
}
fn default_true() -> bool {
    true
}
fn default_login_provider_name() -> String {
    "tmos".to_string()
}
fn default_partition() -> String {
    "Common".to_string()
}
fn default_timeout() -> u64 {
    30
}
fn default_pid_file() -> String {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        format!("{}/ifilesentry.pid", runtime_dir)
    } else {
        "/tmp/ifilesentry.pid".to_string()
    }
}

fn default_log_file() -> String {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        format!("{}/ifilesentry/daemon.log", data_home)
    } else if let Ok(home) = std::env::var("HOME") {
        format!("{}/.local/share/ifilesentry/daemon.log", home)
    } else {
        "/tmp/ifilesentry-daemon.log".to_string()
    }
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for BigIpConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth_method: default_auth_method(),
            user: String::new(),
            password: String::new(),
            password_env: default_password_env(),
            ssl_check: default_true(),
            login_provider_name: default_login_provider_name(),
            partition: default_partition(),
            timeout: default_timeout(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            log_file: default_log_file(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_true(),
        }
    }
}

impl BigIpConfig {
    /// Password from the configuration file, falling back to the environment
    pub fn resolve_password(&self) -> Result<String> {
        if !self.password.is_empty() {
            return Ok(self.password.clone());
        }

        match std::env::var(&self.password_env) {
            Ok(password) if !password.is_empty() => Ok(password),
            _ => Err(anyhow!(
                "No BIG-IP password configured. Set bigip.password or the {} environment variable",
                self.password_env
            )),
        }
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        // Expand environment variables in paths
        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("ifilesentry").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        for watch in &mut self.watch {
            watch.directory = shellexpand::full(&watch.directory)
                .with_context(|| format!("Failed to expand watch directory {:?}", watch.directory))?
                .into_owned();
        }

        self.daemon.pid_file = shellexpand::full(&self.daemon.pid_file)
            .context("Failed to expand pid_file path")?
            .into_owned();

        self.daemon.log_file = shellexpand::full(&self.daemon.log_file)
            .context("Failed to expand log_file path")?
            .into_owned();

        Ok(())
    }

    /// Check that the configuration is usable for synchronization
    pub fn validate(&self) -> Result<()> {
        if self.bigip.url.is_empty() {
            bail!("bigip.url is not set");
        }

        match self.bigip.auth_method.as_str() {
            "basic" | "token" => {}
            other => bail!("unsupported auth method {:?} (expected \"basic\" or \"token\")", other),
        }

        if self.watch.is_empty() {
            bail!("no directory configured under watch");
        }

        if let Some(index) = self.watch.iter().position(|w| w.directory.trim().is_empty()) {
            bail!("watch entry {} has an empty directory", index);
        }

        Ok(())
    }

    /// Watch targets in configuration order
    pub fn watch_targets(&self) -> Vec<WatchTarget> {
        self.watch
            .iter()
            .map(|w| WatchTarget::new(&w.directory, w.exclude.clone()))
            .collect()
    }
}
