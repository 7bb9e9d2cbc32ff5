//! System health checks for ifilesentry
//!
//! This module provides preflight checks to verify the configuration, the
//! watched directories and the BIG-IP connection before running operations.

use crate::exclusion::malformed_patterns;
use crate::remote::RemoteStore;
use crate::Config;
use std::path::Path;

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Configuration validity
    pub config: CheckResult,
    /// One result per watch directory, in configuration order
    pub directories: Vec<(String, CheckResult)>,
    /// Exclusion pattern syntax (warning only)
    pub patterns: CheckResult,
    /// BIG-IP connectivity
    pub remote: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }
}

impl HealthCheck {
    /// Run all health checks against `store`
    pub async fn run(config: &Config, store: &dyn RemoteStore) -> Self {
        Self {
            remote: Self::check_remote(store).await,
            ..Self::local(config)
        }
    }

    /// Run the local checks only, reporting why the BIG-IP could not be reached
    pub fn without_remote(config: &Config, reason: impl Into<String>) -> Self {
        Self {
            remote: CheckResult::error_with_details("Cannot connect to BIG-IP", reason),
            ..Self::local(config)
        }
    }

    fn local(config: &Config) -> Self {
        Self {
            config: Self::check_config(config),
            directories: config
                .watch
                .iter()
                .map(|w| (w.directory.clone(), Self::check_directory(Path::new(&w.directory))))
                .collect(),
            patterns: Self::check_patterns(config),
            remote: CheckResult::error("BIG-IP not checked"),
        }
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.all_checks().iter().all(|(_, r)| r.passed)
    }

    /// Get list of failed checks (errors only, not warnings)
    pub fn errors(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| !r.passed && !r.is_warning)
            .collect()
    }

    /// Get list of warnings
    pub fn warnings(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| r.is_warning)
            .collect()
    }

    fn check_config(config: &Config) -> CheckResult {
        match config.validate() {
            Ok(()) => CheckResult::ok_with_details(
                "Configuration valid",
                format!("{} watched director(y/ies)", config.watch.len()),
            ),
            Err(e) => CheckResult::error_with_details("Invalid configuration", e.to_string()),
        }
    }

    /// Check a watch directory exists and can be listed
    fn check_directory(path: &Path) -> CheckResult {
        if !path.exists() {
            return CheckResult::error_with_details(
                "Directory does not exist",
                format!("Run: mkdir -p {}", path.display()),
            );
        }
        if !path.is_dir() {
            return CheckResult::error("Not a directory");
        }

        match std::fs::read_dir(path) {
            Ok(entries) => {
                let files = entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                    .count();
                CheckResult::ok_with_details("Directory readable", format!("{} file(s)", files))
            }
            Err(e) => CheckResult::error_with_details("Directory not readable", e.to_string()),
        }
    }

    /// Malformed patterns never match, so they only warn
    fn check_patterns(config: &Config) -> CheckResult {
        let malformed: Vec<String> = config
            .watch
            .iter()
            .flat_map(|w| malformed_patterns(&w.exclude))
            .collect();

        if malformed.is_empty() {
            CheckResult::ok("Exclusion patterns valid")
        } else {
            CheckResult::warning_with_details(
                "Malformed exclusion patterns will never match",
                malformed.join(", "),
            )
        }
    }

    async fn check_remote(store: &dyn RemoteStore) -> CheckResult {
        match store.list_records().await {
            Ok(records) => CheckResult::ok_with_details(
                "BIG-IP reachable",
                format!("{} iFile(s) on the device", records.len()),
            ),
            Err(e) => CheckResult::error_with_details("BIG-IP request failed", e.to_string()),
        }
    }

    /// Get all checks with their display names
    pub fn all_checks(&self) -> Vec<(String, &CheckResult)> {
        let mut checks = vec![("Configuration".to_string(), &self.config)];
        checks.extend(
            self.directories
                .iter()
                .map(|(dir, result)| (format!("Directory {}", dir), result)),
        );
        checks.push(("Exclusion Patterns".to_string(), &self.patterns));
        checks.push(("BIG-IP Connection".to_string(), &self.remote));
        checks
    }
}
