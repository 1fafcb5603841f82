//! Marketplace ops gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ request id ─▶ timeout ─▶ identity ─▶ rate limit ─▶ auth-failure ─▶ cache ─▶ proxy ──▶ Upstream API
//!                                                          │                          │
//!                                                          ▼                          ▼
//!                                                   429 + Retry-After        HIT replayed from store
//!
//!     Shared: config (TOML) · store (counters + cached bodies) · observability (tracing, Prometheus)
//! ```
//!
//! Backups run out of band through `backup-cli`.

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use marketplace_ops::config::load_config_or_default;
use marketplace_ops::lifecycle::{wait_for_signal, Shutdown};
use marketplace_ops::observability::{logging, metrics};
use marketplace_ops::HttpServer;

#[derive(Parser)]
#[command(name = "marketplace-ops")]
#[command(about = "Rate-limiting, caching gateway for the marketplace API", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config_or_default(&cli.config)?;

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "marketplace-ops starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.base_url,
        rate_limit = config.rate_limit.enabled,
        cache = config.cache.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let shutdown = Shutdown::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_shutdown.trigger();
    });

    let server = HttpServer::new(config);
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
