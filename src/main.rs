use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use throttled::config::ThrottledConfig;
use throttled::error::ThrottledError;
use throttled::http::HttpServer;
use throttled::ratelimit::AdmissionController;

/// Keyed token-bucket admission control service.
#[derive(Debug, Parser)]
#[command(name = "throttled", version, about)]
struct Args {
    /// Listen port
    #[arg(long)]
    port: Option<u16>,

    /// Cache size (maximum number of keys)
    #[arg(long)]
    size: Option<usize>,

    /// Path to a YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    info!("Starting Throttled admission control service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = ThrottledConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = Some(port);
    }
    if let Some(size) = args.size {
        config.store.cache_size = size;
    }
    config.validate()?;
    let addr = config
        .listen_addr()
        .ok_or_else(|| ThrottledError::Config("port is required".to_string()))?;
    info!(addr = %addr, cache_size = config.store.cache_size, "Configuration loaded");

    let controller = Arc::new(AdmissionController::new(config.store.cache_size)?);
    info!("Admission controller initialized");

    HttpServer::new(addr, controller)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("Throttled admission control service stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
