//! # Ripple Server
//!
//! WebSocket server built on the Ripple transport layer. Every connection becomes a
//! transport; the bundled application echoes messages back and tracks open
//! transports for `/health` and Prometheus metrics.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! ripple
//!
//! # Run with a config file in the working directory
//! cat ripple.toml && ripple
//!
//! # Run with environment variables
//! RIPPLE_PORT=8080 RIPPLE_HOST=0.0.0.0 ripple
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ripple=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!("Starting Ripple server on {}:{}", config.host, config.port);

    if config.metrics.enabled {
        metrics::init_metrics();
    }

    handlers::run_server(config).await?;

    Ok(())
}
