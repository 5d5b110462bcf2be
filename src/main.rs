//! Passenger service with audit pipeline.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ───────────────▶ http::middleware ──▶ handlers ──▶ persistence::Session
//!                      (correlation scope)      │              │ flush
//!                                               │              ▼
//!                                 audit::decorator        capture hooks
//!                                               │              │
//!                                               ▼              ▼
//!                                     audit::record     audit::delivery ──▶ Audit service
//!                                               │
//!                                               ▼
//!                              observability::tracing ──▶ Span collector / local
//!
//!     observability::logging ──▶ metrics backend (Prometheus recorder / HTTP push)
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audit_pipeline::config::{self, PipelineConfig};
use audit_pipeline::http::HttpServer;
use audit_pipeline::lifecycle::{self, Shutdown};
use audit_pipeline::observability::metrics;

#[derive(Parser, Debug)]
#[command(name = "audit-pipeline", version, about = "Passenger service with request audit pipeline")]
struct Cli {
    /// TOML configuration file. Defaults plus environment overrides apply without it.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn load(cli: &Cli) -> Result<PipelineConfig, config::ConfigError> {
    match &cli.config {
        Some(path) => config::load_config(path),
        None => config::load_from_env(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load(&cli)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "audit-pipeline starting");
    tracing::info!(
        bind_address = %config.server.bind_address,
        audit_enabled = config.audit.enabled,
        collector_hosts = %config.tracing.collector_hosts,
        "Configuration loaded"
    );

    if config.metrics.prometheus_enabled {
        match config.metrics.prometheus_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.metrics.prometheus_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let state = lifecycle::start(&config, &shutdown).await?;

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    let server = HttpServer::new(&config.server, state);
    server.run(listener, lifecycle::ctrl_c()).await?;

    let listeners = shutdown.trigger();
    tracing::info!(tasks = listeners, "Background tasks signalled");
    // One final export per task, each bounded by the export timeout.
    let grace = Duration::from_secs(config.tracing.export_timeout_secs + 1);
    if !shutdown.drain(grace).await {
        tracing::warn!("Exiting before background tasks finished flushing");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
