//! # pointhub
//!
//! Real-time point-data hub.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! pointhub
//!
//! # Run with a specific config file
//! POINTHUB_CONFIG=/path/to/pointhub.toml pointhub
//!
//! # Run with environment variables
//! POINTHUB_PORT=8080 POINTHUB_HOST=0.0.0.0 pointhub
//! ```

use anyhow::Result;
use pointhub_server::{config::Config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "pointhub=debug,pointhub_server=debug,pointhub_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;

    tracing::info!("Starting pointhub on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
