// Logging behavior:
// - Writes logs to both stderr and a daily-rotated file at logs/overtype.log.
// - Default log level is INFO. Control via RUST_LOG:
//   * RUST_LOG=info                       # Standard logging (default)
//   * RUST_LOG=debug                      # Verbose debugging
//   * RUST_LOG=overtype_app=debug         # Fine-grained per-module control
// - The logs/ directory is created on startup if missing; file output uses a
//   non-blocking writer with ANSI disabled.
// - Keystroke content never appears above trace, and never from sensitive
//   windows.
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use clap::Parser;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use overtype_app::runtime::{self, AppRuntimeOptions};
use overtype_config::{EnvFile, KeyStore, KeyringSource, Settings};
use overtype_foundation::{
    exit_codes, AppState, OvertypeError, ShutdownCoordinator, StateManager,
};

fn init_logging() -> Result<tracing_appender::non_blocking::WorkerGuard, Box<dyn std::error::Error>>
{
    std::fs::create_dir_all("logs")?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "overtype.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = fmt::layer().with_writer(std::io::stderr);
    let file_layer = fmt::layer().with_writer(non_blocking_file).with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(guard)
}

/// Prune rotated log files in `logs/` older than `retention_days`.
/// `Some(0)` disables pruning; the default is 7 days.
fn prune_old_logs(retention_days: Option<u64>) {
    let retention = retention_days.unwrap_or(7);
    if retention == 0 {
        tracing::debug!("Log retention disabled (retention_days=0)");
        return;
    }

    let cutoff = match SystemTime::now().checked_sub(Duration::from_secs(retention * 24 * 60 * 60))
    {
        Some(t) => t,
        None => return,
    };

    let logs_dir = Path::new("logs");
    if !logs_dir.exists() {
        return;
    }

    match fs::read_dir(logs_dir) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let path = entry.path();
                if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
                    if name.starts_with("overtype.log.") {
                        if let Ok(meta) = entry.metadata() {
                            if let Ok(modified) = meta.modified() {
                                if modified < cutoff {
                                    if let Err(e) = fs::remove_file(&path) {
                                        tracing::warn!(
                                            "Failed to remove old log {}: {}",
                                            path.display(),
                                            e
                                        );
                                    } else {
                                        tracing::info!("Removed old log file: {}", path.display());
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        Err(e) => tracing::warn!("Failed to read logs directory for pruning: {}", e),
    }
}

#[derive(Parser, Debug)]
#[command(name = "overtype", author, version, about = "Overtype typing copilot daemon")]
struct Cli {
    /// Provider key-value config file
    #[arg(long = "config", env = "OVERTYPE_CONFIG")]
    config: Option<PathBuf>,

    /// Settings file (TOML)
    #[arg(long = "settings")]
    settings: Option<PathBuf>,

    /// AI worker command
    #[arg(long = "worker-cmd", env = "OVERTYPE_WORKER_CMD")]
    worker_cmd: Option<String>,

    /// Record recent keystroke buffer states for debugging
    #[arg(long = "debug-keystrokes")]
    debug_keystrokes: bool,

    /// List provider agents and whether a key is configured, then exit
    #[arg(long = "list-agents")]
    list_agents: bool,
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("overtype")
        .join("overtype.env")
}

#[tokio::main]
async fn main() {
    let _log_guard = match init_logging() {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("failed to initialize logging: {err}");
            std::process::exit(exit_codes::CONFIG_INVALID);
        }
    };
    let retention_days = std::env::var("OVERTYPE_LOG_RETENTION_DAYS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok());
    prune_old_logs(retention_days);
    tracing::info!("Starting Overtype daemon");

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => std::process::exit(exit_codes::CLEAN),
        Err(err) => {
            tracing::error!("fatal: {err}");
            eprintln!("overtype: {err}");
            std::process::exit(err.exit_code());
        }
    }
}

async fn run(cli: Cli) -> Result<(), OvertypeError> {
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let env = EnvFile::load(&config_path)?;

    let key_store = match KeyStore::open(KeyStore::default_path(), &KeyringSource) {
        Ok(store) => Some(store),
        Err(err) => {
            tracing::warn!("key store unavailable: {err}");
            None
        }
    };

    if cli.list_agents {
        for agent in overtype_config::AGENT_REGISTRY.iter() {
            let configured = env.is_set(agent.env_key)
                || key_store
                    .as_ref()
                    .map(|s| matches!(s.get(agent.env_key), Ok(Some(_))))
                    .unwrap_or(false);
            println!(
                "{:<12} {:<24} {}",
                agent.id,
                agent.env_key,
                if configured { "configured" } else { "missing" }
            );
        }
        return Ok(());
    }

    let settings_path = cli.settings.unwrap_or_else(Settings::default_path);
    let settings = Settings::load(&settings_path)?;

    let worker_program = cli
        .worker_cmd
        .or_else(|| env.get("OVERTYPE_WORKER_CMD").map(str::to_string))
        .unwrap_or_else(|| "overtype-worker".to_string());

    let privacy_patterns: Vec<String> = env
        .get("OVERTYPE_PRIVACY_PATTERNS")
        .map(|raw| raw.split(';').map(str::to_string).collect())
        .unwrap_or_default();

    let opts = AppRuntimeOptions {
        settings,
        settings_path: Some(settings_path),
        env,
        key_store,
        worker_program,
        privacy_patterns,
        enable_debug_log: cli.debug_keystrokes,
        ..Default::default()
    };

    let state = StateManager::new();
    let handle = runtime::start(opts).await?;
    state.transition(AppState::Running)?;
    tracing::info!("Overtype running; Ctrl-C to exit");

    let shutdown = ShutdownCoordinator::new();
    let mut shutdown_signal = shutdown.install();
    let failed_child = tokio::select! {
        _ = shutdown_signal.wait() => None,
        child = handle.wait_child_failed() => Some(child),
    };
    if let Some(child) = failed_child {
        // Fan the exit out to every shutdown observer before tearing down.
        shutdown.trigger(&format!("supervisor gave up on {child}"));
    }

    state.transition(AppState::Stopping)?;
    handle.shutdown().await;
    state.transition(AppState::Stopped)?;
    match failed_child {
        Some(child) => Err(OvertypeError::SupervisorGaveUp {
            child: child.to_string(),
        }),
        None => Ok(()),
    }
}
