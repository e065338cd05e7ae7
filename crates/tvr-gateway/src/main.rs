//! Webhook relay entry point.
//!
//! Receives charting-platform signals on `/tv` and drives the
//! CANCAL → ENTER → BATCH_TPS chain against the exchange.

use anyhow::Result;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tvr_telemetry::init_logging()?;

    info!("Starting webhook relay v{}", env!("CARGO_PKG_VERSION"));

    let config = tvr_gateway::RelayConfig::from_env()?;
    let app = tvr_gateway::Application::new(config)?;
    app.run().await?;

    Ok(())
}
