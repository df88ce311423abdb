//! Swarm Daemon - failure recovery service
//!
//! Reads trigger records as JSON lines on stdin, hands them to the
//! orchestration coordinator and writes completion, status and refusal
//! records as JSON lines on stdout. Logs go to stderr.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use swarm_orchestrator::{Collaborators, OrchestrationCoordinator, PassthroughDetector, SwarmConfig};
use swarm_resilience::StaticProber;
use swarm_types::{FixedMetricsSource, NoOpActionExecutor, TriggerDraft};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod reload;
mod sink;

use reload::ConfigWatcher;
use sink::JsonLinesSink;

const INTAKE_BUFFER: usize = 64;

/// Swarm Daemon CLI
#[derive(Parser)]
#[command(name = "swarmd")]
#[command(about = "Swarm Daemon - failure recovery and resilience orchestration", long_about = None)]
#[command(version)]
struct Cli {
    /// Log level
    #[arg(long, global = true, env = "SWARM_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true, env = "SWARM_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the coordinator over triggers read from stdin
    Run {
        /// Configuration file path
        #[arg(short, long, env = "SWARM_CONFIG")]
        config: Option<PathBuf>,

        /// How often the config file is checked for changes
        #[arg(long, env = "SWARM_RELOAD_INTERVAL_SECS", default_value_t = 5)]
        reload_interval_secs: u64,
    },

    /// Parse and validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long, env = "SWARM_CONFIG")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs on stderr; stdout carries output records
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());

    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    match cli.command {
        Command::Run {
            config,
            reload_interval_secs,
        } => run(config.as_deref(), Duration::from_secs(reload_interval_secs.max(1))).await,
        Command::Validate { config } => validate(&config),
    }
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let config = SwarmConfig::load(path)
        .with_context(|| format!("invalid configuration {}", path.display()))?;
    println!(
        "{}: ok ({} breakers, {} failover groups, {} strategies, {} scenarios)",
        path.display(),
        config.resilience.breakers.len(),
        config.resilience.failover_groups.len(),
        config.recovery.strategies.len(),
        config.healing.scenarios.len()
    );
    Ok(())
}

async fn run(config_path: Option<&Path>, reload_every: Duration) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => SwarmConfig::load(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => {
            tracing::info!("No configuration file given, using defaults");
            SwarmConfig::default()
        }
    };

    tracing::warn!(
        "No live integrations wired in: actions are no-ops, metrics are fixed and all endpoints probe healthy"
    );
    let coordinator = Arc::new(OrchestrationCoordinator::new(
        config,
        Collaborators {
            executor: Arc::new(NoOpActionExecutor),
            metrics: Arc::new(FixedMetricsSource::healthy()),
            sink: Arc::new(JsonLinesSink::new(std::io::stdout())),
            prober: Arc::new(StaticProber::new()),
            detector: Arc::new(PassthroughDetector),
        },
    )?);

    let mut handles = vec![coordinator.start_background()];
    let (stop_tx, stop_rx) = watch::channel(false);
    if let Some(path) = config_path {
        handles.push(ConfigWatcher::new(path).spawn(coordinator.clone(), reload_every, stop_rx));
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Swarm daemon started");

    tokio::select! {
        _ = intake(&coordinator) => {
            tracing::info!("Trigger input closed");
        }
        _ = shutdown_signal() => {}
    }

    let stopped = coordinator.shutdown().await;
    stop_tx.send_replace(true);
    for handle in handles {
        let _ = handle.await;
    }

    let stats = coordinator.stats();
    tracing::info!(
        completed = stats.completed,
        failed = stats.failed,
        stopped = stopped.len(),
        refused = stats.refused,
        "Swarm daemon shut down"
    );
    Ok(())
}

/// Feed stdin trigger lines to the coordinator until EOF.
///
/// Stdin is read on a detached thread so a pending read never holds up
/// shutdown.
async fn intake(coordinator: &Arc<OrchestrationCoordinator>) {
    let (tx, mut rx) = mpsc::channel::<String>(INTAKE_BUFFER);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read trigger input");
                    return;
                }
            }
        }
    });

    while let Some(line) = rx.recv().await {
        if line.trim().is_empty() {
            continue;
        }

        let draft: TriggerDraft = match serde_json::from_str(&line) {
            Ok(draft) => draft,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed trigger line");
                continue;
            }
        };
        // Refusals are already reported through the sink
        if let Err(e) = coordinator.handle(draft.into_trigger()) {
            tracing::debug!(error = %e, "Trigger not admitted");
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_config_is_valid() {
        let config = SwarmConfig::from_toml_str(include_str!("../swarm.toml")).unwrap();
        assert_eq!(config.resilience.failover_groups["ledger"].secondaries.len(), 2);
        assert_eq!(config.resilience.breakers["ledger-primary"].failure_threshold, 3);
        assert_eq!(config.orchestrator.resource_tick, Duration::from_secs(5));
    }

    #[test]
    fn test_cli_parses_run_and_validate() {
        let cli = Cli::try_parse_from(["swarmd", "--json", "run", "--config", "swarm.toml"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Command::Run { config: Some(_), reload_interval_secs: 5 }));

        let cli = Cli::try_parse_from(["swarmd", "validate", "-c", "swarm.toml"]).unwrap();
        assert!(matches!(cli.command, Command::Validate { .. }));
    }
}
