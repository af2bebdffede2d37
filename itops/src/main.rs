//! ITOps Alert Analysis Main Binary
//!
//! Runs the whole pipeline in one process:
//! - Correlation: raw events into fault points and problems
//! - RCA: batched root cause analysis of new problems
//! - API: webhook intake, queries and manual operations
//! - Config: file watching and remote business config refresh

mod app;

use anyhow::{Context, Result};
use app::Application;
use clap::{Parser, Subcommand};
use itops_core::config::{Config, ConfigManager};
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// ITOps alert analysis CLI arguments
#[derive(Debug, Parser)]
#[clap(name = "itops-alert-analysis", version, about = "Alert correlation and root cause analysis")]
struct Cli {
    /// Configuration file path
    #[clap(short, long, env = "ITOPS_CONFIG", default_value = "config/config.yaml", global = true)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides `log.level`
    #[clap(long, env = "ITOPS_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    /// Enable JSON logging; overrides `log.json`
    #[clap(long, env = "ITOPS_LOG_JSON", global = true)]
    log_json: bool,

    /// Build every component, then exit without starting them
    #[clap(long, global = true)]
    dry_run: bool,

    /// Subcommand to execute
    #[clap(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands
#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the service (default if no subcommand given)
    Serve,
    /// Load and validate the configuration, then print a summary
    CheckConfig {
        /// Print the full configuration as JSON
        #[clap(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = Config::from_file(&cli.config);
    let (level, json) = match &loaded {
        Ok(config) => (
            cli.log_level.clone().unwrap_or_else(|| config.log.level.clone()),
            cli.log_json || config.log.json,
        ),
        Err(_) => (cli.log_level.clone().unwrap_or_else(|| "info".to_string()), cli.log_json),
    };
    init_logging(&level, json)?;

    info!("Starting ITOps alert analysis v{}", env!("CARGO_PKG_VERSION"));
    info!("Loading configuration from: {:?}", cli.config);
    let config = loaded.context("Failed to load configuration")?;

    match cli.command {
        Some(Commands::CheckConfig { json }) => check_config(&config, json),
        Some(Commands::Serve) | None => run_serve_command(&cli, config).await,
    }
}

/// Print what the service would run with
fn check_config(config: &Config, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }
    println!("Configuration OK");
    println!("  api:            {}:{}", config.api.host, config.api.port);
    println!("  transport:      {:?}", config.kafka.transport);
    println!("  raw events:     {}", config.kafka.raw_events.topic);
    println!("  problem events: {}", config.kafka.problem_events.topic);
    println!(
        "  storage:        {:?} (prefix {})",
        config.storage.backend, config.storage.index_prefix
    );
    println!("  source type:    {}", config.app_config.ingest.source.source_type);
    println!("  knowledge id:   {}", config.app_config.knowledge_network.knowledge_id);
    println!(
        "  rca:            window {:?}, {} concurrent, timeout {:?}",
        config.rca.batch_window, config.rca.max_concurrent, config.rca.task_timeout
    );
    Ok(())
}

/// Build everything and run until a signal or the first failure
async fn run_serve_command(cli: &Cli, config: Config) -> Result<()> {
    let manager = ConfigManager::with_config(cli.config.clone(), config)
        .context("Failed to initialize configuration manager")?;
    let app = Application::build(manager).context("Failed to build application")?;

    if cli.dry_run {
        info!("Dry run mode - application built, exiting");
        app.close().await;
        return Ok(());
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_signal() => cancel.cancel(),
                _ = cancel.cancelled() => {}
            }
        });
    }
    app.run(cancel).await
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("Received Ctrl+C, shutting down..."); },
        _ = terminate => { info!("Received SIGTERM, shutting down..."); },
    }
}

/// Initialize logging
fn init_logging(level: &str, json: bool) -> Result<()> {
    let log_level = level.parse::<tracing::Level>().context("Invalid log level")?;

    if json {
        // JSON structured logging
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(log_level.into()))
            .init();
    } else {
        // Human-readable logging
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(log_level.into()))
            .init();
    }

    info!("Logging initialized at level: {}", log_level);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_is_default() {
        let cli = Cli::try_parse_from(["itops-alert-analysis", "--config", "/etc/itops/config.yaml"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("/etc/itops/config.yaml"));
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_check_config_subcommand() {
        let cli = Cli::try_parse_from(["itops-alert-analysis", "check-config", "--json", "--dry-run"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::CheckConfig { json: true })));
        assert!(cli.dry_run);
    }

    #[test]
    fn test_check_config_accepts_loaded_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "api:\n  port: 18080\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.api.port, 18080);
        check_config(&config, false).unwrap();
        check_config(&config, true).unwrap();
    }
}
