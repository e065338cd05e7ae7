//! Webhook gateway: configuration, HTTP ingress, and application wiring.

pub mod app;
pub mod config;
pub mod error;
pub mod server;

pub use app::Application;
pub use config::RelayConfig;
pub use error::{GatewayError, GatewayResult};
pub use server::{create_router, AppState};
