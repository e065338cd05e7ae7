//! Application wiring.
//!
//! Builds the exchange client, product cache, and dispatcher from
//! configuration and runs the HTTP listener until shutdown.

use crate::config::RelayConfig;
use crate::error::GatewayResult;
use crate::server::{create_router, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tvr_chain::Dispatcher;
use tvr_exchange::{ExchangeClient, ProductCache};

/// Main application.
pub struct Application {
    config: RelayConfig,
    state: AppState,
}

impl Application {
    pub fn new(config: RelayConfig) -> GatewayResult<Self> {
        let client = Arc::new(ExchangeClient::new(config.exchange.clone())?);
        let products = Arc::new(ProductCache::new(Arc::clone(&client)));
        let dispatcher = Arc::new(Dispatcher::new(client, products, config.chain.clone()));

        let state = AppState {
            dispatcher,
            webhook_token: config.webhook_token.clone(),
            strict_sequence: config.strict_sequence,
            started_at: Instant::now(),
        };

        Ok(Self { config, state })
    }

    /// Serve until ctrl-c. In-flight dispatches run to completion.
    pub async fn run(self) -> GatewayResult<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.listen_port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, strict = self.config.strict_sequence, "webhook relay listening");

        axum::serve(listener, create_router(self.state))
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("webhook relay stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}
