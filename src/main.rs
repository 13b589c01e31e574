use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tollgate::config::{AppConfig, LogFormat, LoggingConfig};
use tollgate::error::TollgateError;
use tollgate::http::{AdmissionState, HttpServer};
use tollgate::ratelimit::RateLimiter;
use tollgate::store::StoreRegistry;

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "tollgate", version, about = "Rate-limiting HTTP front door")]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log output format, overriding the configuration
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Listen address, overriding the configuration
    #[arg(long)]
    addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }

    init_tracing(&config.logging);

    info!("Starting Tollgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        addr = %config.server.addr,
        storage = %config.storage_type,
        ip_limit = config.ip.rate_limit,
        token_overrides = config.token.len(),
        "Configuration loaded"
    );

    // Initialize the counter store
    let registry = StoreRegistry::with_defaults();
    let store = registry
        .create(&config.storage_type, config.storage_config())
        .await
        .map_err(|e| {
            error!(
                storage = %config.storage_type,
                available = ?registry.names(),
                error = %e,
                "Failed to initialize counter store"
            );
            TollgateError::Storage(e)
        })?;

    // Initialize the rate limiter
    let rate_limiter = Arc::new(RateLimiter::new(store, config.limiter_config()));
    info!("Rate limiter initialized");

    let admission_state = AdmissionState::new(rate_limiter.clone(), &config.admission)?;
    let server = HttpServer::new(config.server.addr, admission_state);

    // Run the server with graceful shutdown on Ctrl+C
    let served = server.serve_with_shutdown(shutdown_signal()).await;

    if let Err(e) = rate_limiter.close().await {
        error!(error = %e, "Failed to close counter store");
    }
    served?;

    info!("Tollgate stopped");
    Ok(())
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
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
