use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ifilesentry::config::LoggingConfig;
use ifilesentry::daemon::{self, is_daemon_running};
use ifilesentry::health::CheckResult;
use ifilesentry::scanner::ChangeAction;
use ifilesentry::{BigIpClient, Config, Daemon, HealthCheck, RemoteStore, Scanner};

#[derive(Parser)]
#[command(name = "ifilesentry")]
#[command(about = "Keep BIG-IP iFiles in sync with local directories")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Reconcile every watched directory once and exit
    Scan {
        /// Show what would change without touching the BIG-IP
        #[arg(long)]
        dry_run: bool,
    },

    /// List the iFiles present on the BIG-IP
    List,

    /// Run as daemon
    Daemon {
        #[command(subcommand)]
        daemon_command: DaemonCommands,
    },

    /// System health check and diagnostics
    Doctor,
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Start the daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(long)]
        foreground: bool,
    },

    /// Stop running daemon
    Stop,

    /// Show daemon status
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        init_logging(&LoggingConfig::default(), cli.verbose, true)?;
        return cmd_init(cli.config.as_deref(), force);
    }

    let mut config = load_config(cli.config.as_deref())?;
    absolutize_watch_directories(&mut config)?;

    let background = matches!(
        cli.command,
        Commands::Daemon {
            daemon_command: DaemonCommands::Start { foreground: false }
        }
    );

    // Forking is only safe before the runtime threads exist.
    if background {
        prepare_background(&config)?;
    }

    init_logging(&config.logging, cli.verbose, !background)?;
    info!("Starting ifilesentry v{}", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    runtime.block_on(async {
        match cli.command {
            Commands::Init { .. } => Ok(()),
            Commands::Scan { dry_run } => cmd_scan(dry_run, &config).await,
            Commands::List => cmd_list(&config).await,
            Commands::Daemon { daemon_command } => cmd_daemon(daemon_command, config).await,
            Commands::Doctor => cmd_doctor(&config).await,
        }
    })
}

/// Initialize logging from configuration, `--verbose` and `RUST_LOG`
fn init_logging(logging: &LoggingConfig, verbose: bool, ansi: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .with_context(|| format!("Invalid log level {:?}", default_level))?;

    let layer = fmt::layer().with_ansi(ansi && logging.color);
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format.as_str() {
        "pretty" => registry.with(layer.pretty()).init(),
        "full" => registry.with(layer).init(),
        _ => registry.with(layer.compact()).init(),
    }

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

/// Relative watch directories are resolved against the launch directory
fn absolutize_watch_directories(config: &mut Config) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;

    for watch in &mut config.watch {
        if !watch.directory.is_empty() && Path::new(&watch.directory).is_relative() {
            watch.directory = cwd.join(&watch.directory).to_string_lossy().into_owned();
        }
    }

    Ok(())
}

#[cfg(unix)]
fn prepare_background(config: &Config) -> Result<()> {
    config.validate()?;

    if is_daemon_running(config)? {
        println!("⚠️  Daemon is already running!");
        println!("   Use 'ifilesentry daemon stop' to stop it first");
        std::process::exit(1);
    }

    println!("✅ Daemon starting in background");
    println!("   PID file: {}", config.daemon.pid_file);
    println!("   Log file: {}", config.daemon.log_file);

    daemon::daemonize(&config.daemon)
}

#[cfg(not(unix))]
fn prepare_background(_config: &Config) -> Result<()> {
    bail!("Background daemon mode not supported on this platform, use --foreground")
}

/// Write the default configuration template
fn cmd_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let config_path = match config_path {
        Some(path) => path.to_path_buf(),
        None => Config::default_config_path()?,
    };

    if config_path.exists() && !force {
        bail!(
            "Configuration already exists at {:?} (use --force to overwrite)",
            config_path
        );
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    Config::default().save(&config_path)?;
    info!("Configuration saved to: {:?}", config_path);

    println!("✅ ifilesentry initialized successfully!");
    println!("   Config: {:?}", config_path);
    println!("   Next: set bigip.url and add watch directories, then run 'ifilesentry doctor'");

    Ok(())
}

async fn connect(config: &Config) -> Result<Arc<dyn RemoteStore>> {
    let client = BigIpClient::connect(&config.bigip).await?;
    Ok(Arc::new(client))
}

/// Reconcile every watched directory once
async fn cmd_scan(dry_run: bool, config: &Config) -> Result<()> {
    config.validate()?;
    let store = connect(config).await?;
    let scanner = Scanner::new(store);

    let targets = config.watch_targets();
    let mut failed = 0;

    for target in &targets {
        println!("📁 {}", target.directory.display());

        if dry_run {
            match scanner.plan(target).await {
                Ok(changes) if changes.is_empty() => println!("   ✅ Up to date"),
                Ok(changes) => {
                    for change in changes {
                        match change.action {
                            ChangeAction::Create => println!("   📥 Create: {}", change.name),
                            ChangeAction::Update => println!("   🔄 Update: {}", change.name),
                        }
                    }
                }
                Err(e) => {
                    failed += 1;
                    println!("   ❌ {}", e);
                }
            }
            continue;
        }

        match scanner.scan(target).await {
            Ok(report) => {
                println!("   📥 Created: {}", report.created.len());
                println!("   🔄 Updated: {}", report.updated.len());
                println!("   ✅ Unchanged: {}", report.unchanged.len());
            }
            Err(e) => {
                failed += 1;
                println!("   ❌ {}", e);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} directories failed", failed, targets.len());
    }

    Ok(())
}

/// List the iFiles present on the BIG-IP
async fn cmd_list(config: &Config) -> Result<()> {
    let store = connect(config).await?;
    let mut records = store.list_records().await?;
    records.sort_by(|a, b| a.name.cmp(&b.name));

    println!("iFiles ({}):", records.len());
    for record in records {
        println!("  📄 {}  {}", record.name, record.checksum);
    }

    Ok(())
}

/// Handle daemon commands
async fn cmd_daemon(daemon_command: DaemonCommands, config: Config) -> Result<()> {
    match daemon_command {
        DaemonCommands::Start { foreground } => {
            if foreground {
                config.validate()?;

                if is_daemon_running(&config)? {
                    println!("⚠️  Daemon is already running!");
                    println!("   Use 'ifilesentry daemon stop' to stop it first");
                    return Ok(());
                }

                println!("🖥️  Running in foreground mode (Ctrl+C to stop)");
            }

            let store = connect(&config).await?;
            Daemon::new(config, store)?.run().await?;
        }

        DaemonCommands::Stop => {
            println!("🛑 Stopping ifilesentry daemon...");

            if !is_daemon_running(&config)? {
                println!("⚠️  No daemon appears to be running");
                return Ok(());
            }

            daemon::stop(&config)?;
            println!("✅ Daemon stop signal sent");
        }

        DaemonCommands::Status => {
            println!("📊 ifilesentry Daemon Status");

            if is_daemon_running(&config)? {
                println!("   🟢 Status: Running");
                for watch in &config.watch {
                    println!("   📁 {}", watch.directory);
                }
                if !config.daemon.log_file.is_empty() {
                    println!("   📄 Log file: {}", config.daemon.log_file);
                }
            } else {
                println!("   🔴 Status: Not running");
                println!("   💡 Use 'ifilesentry daemon start' to start the daemon");
            }
        }
    }

    Ok(())
}

/// System health check and diagnostics
async fn cmd_doctor(config: &Config) -> Result<()> {
    let health = match BigIpClient::connect(&config.bigip).await {
        Ok(client) => HealthCheck::run(config, &client).await,
        Err(e) => HealthCheck::without_remote(config, format!("{:#}", e)),
    };

    print_health_report(&health);
    Ok(())
}

/// Print health check report to stdout
fn print_health_report(health: &HealthCheck) {
    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning {
                "⚠️ "
            } else {
                "✅"
            }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 ifilesentry System Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        print_check(&name, result);
        println!();
    }

    let warnings = health.warnings().len();
    if health.all_passed() {
        println!("✅ All checks passed ({} warning(s))", warnings);
    } else {
        println!(
            "❌ Some checks failed ({} error(s), {} warning(s))",
            health.errors().len(),
            warnings
        );
    }
}
