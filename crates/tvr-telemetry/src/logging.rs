//! Structured logging initialization.

use crate::error::TelemetryResult;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize structured logging for the relay.
///
/// Production (`RUST_ENV=production`) gets flattened JSON lines; anything
/// else gets a compact human format. `RUST_LOG` overrides the default
/// `info,tvr=debug` filter.
pub fn init_logging() -> TelemetryResult<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tvr=debug"));
    let registry = tracing_subscriber::registry().with(filter);

    if production() {
        registry
            .with(fmt::layer().json().flatten_event(true).with_current_span(true))
            .init();
    } else {
        registry
            .with(fmt::layer().compact().with_target(true))
            .init();
    }

    Ok(())
}

fn production() -> bool {
    std::env::var("RUST_ENV").is_ok_and(|v| v == "production")
}
