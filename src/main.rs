//! NextTrace Exporter binary.

use nexttrace_exporter::config::{
    parse_duration, validate_metrics_path, ExporterConfig, DEFAULT_LISTEN_ADDRESS,
    DEFAULT_METRICS_PATH,
};
use nexttrace_exporter::probe::{TraceCommand, DEFAULT_BINARY};
use nexttrace_exporter::scheduler::Scheduler;
use nexttrace_exporter::web::{AppState, Server};

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Prometheus exporter for nexttrace route measurements.
#[derive(Parser, Debug)]
#[command(name = "nexttrace-exporter")]
#[command(version)]
struct Args {
    /// Path to configuration file.
    #[arg(long = "config.file", default_value = "config.yml")]
    config_file: PathBuf,

    /// Address to listen on for web interface and telemetry
    /// [default: localhost:9101].
    #[arg(long = "web.listen-address")]
    listen_address: Option<String>,

    /// Path under which to expose metrics [default: /metrics].
    #[arg(long = "web.telemetry-path", value_parser = parse_metrics_path)]
    metrics_path: Option<String>,

    /// Path to nexttrace binary.
    #[arg(long = "nexttrace.binary", default_value = DEFAULT_BINARY)]
    nexttrace_binary: String,

    /// Timeout for nexttrace execution.
    #[arg(long = "nexttrace.timeout", default_value = "2m", value_parser = parse_timeout)]
    nexttrace_timeout: Duration,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long = "log.level", default_value = "info")]
    log_level: String,
}

fn parse_metrics_path(s: &str) -> Result<String, String> {
    validate_metrics_path(s).map_err(|e| e.to_string())?;
    Ok(s.to_string())
}

fn parse_timeout(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = init_logging(&args.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "Exporter failed");
        std::process::exit(1);
    }
}

fn init_logging(level: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let level = match level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };

    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => tracing_subscriber::EnvFilter::from_default_env(),
        Err(_) => tracing_subscriber::EnvFilter::new(level),
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .try_init()?;

    Ok(())
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cfg = ExporterConfig::load(&args.config_file)?;
    tracing::info!(
        targets = cfg.targets.len(),
        config_file = %args.config_file.display(),
        "Configuration loaded successfully"
    );

    // Flags win over the file, which wins over the defaults.
    let listen_address = args
        .listen_address
        .or_else(|| cfg.server.listen_address.clone())
        .unwrap_or_else(|| DEFAULT_LISTEN_ADDRESS.to_string());
    let metrics_path = args
        .metrics_path
        .or_else(|| cfg.server.metrics_path.clone())
        .unwrap_or_else(|| DEFAULT_METRICS_PATH.to_string());

    let shutdown = CancellationToken::new();
    let command = TraceCommand::new(&args.nexttrace_binary, args.nexttrace_timeout);
    let scheduler = Arc::new(Scheduler::new(command, shutdown.child_token()));
    scheduler.start(&cfg.targets).await;

    let state = AppState::new(args.config_file, metrics_path, cfg, scheduler.clone());
    tokio::spawn(handle_signals(state.clone(), shutdown.clone()));

    let server = Server::new(state);
    let served = server.start(&listen_address, shutdown.clone()).await;

    shutdown.cancel();
    scheduler.stop().await;
    tracing::info!("Shutdown complete");

    served
}

/// SIGHUP reloads the configuration; SIGINT and SIGTERM shut down.
#[cfg(unix)]
async fn handle_signals(state: AppState, shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut hangup, mut terminate) = match (
        signal(SignalKind::hangup()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(hangup), Ok(terminate)) => (hangup, terminate),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error = %e, "Failed to install signal handlers");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                tracing::info!("Received SIGHUP, reloading configuration");
                if let Err(e) = state.reload().await {
                    tracing::error!(error = %e, "Failed to reload configuration");
                }
            }
            _ = terminate.recv() => {
                tracing::info!(signal = "SIGTERM", "Received shutdown signal");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(signal = "SIGINT", "Received shutdown signal");
                break;
            }
        }
    }

    tracing::info!("Shutting down...");
    shutdown.cancel();
}

#[cfg(not(unix))]
async fn handle_signals(_state: AppState, shutdown: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!(signal = "ctrl-c", "Received shutdown signal");
        shutdown.cancel();
    }
}
