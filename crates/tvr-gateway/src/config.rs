//! Process configuration.
//!
//! Everything comes from environment variables; the process refuses to
//! start when a required value is missing or malformed.

use crate::error::{GatewayError, GatewayResult};
use std::str::FromStr;
use std::time::Duration;
use tvr_chain::ChainSettings;
use tvr_exchange::{AuthMode, ExchangeConfig};

/// Default listen port.
const DEFAULT_PORT: u16 = 8787;

/// Full relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen_port: u16,
    /// Compared verbatim against `x-webhook-token`; unset disables the check.
    pub webhook_token: Option<String>,
    /// Require `sig_id` and `seq` on every message.
    pub strict_sequence: bool,
    pub exchange: ExchangeConfig,
    pub chain: ChainSettings,
}

impl RelayConfig {
    /// Load from the process environment.
    pub fn from_env() -> GatewayResult<Self> {
        let base_url = required("BASE_URL")?;
        let api_key = required("API_KEY")?;

        let auth = match optional("AUTH").as_deref() {
            None | Some("hmac") => AuthMode::Hmac,
            Some("keyonly") => AuthMode::KeyOnly,
            Some(other) => {
                return Err(GatewayError::Config(format!(
                    "AUTH must be hmac or keyonly, got {other}"
                )))
            }
        };
        let api_secret = match auth {
            AuthMode::Hmac => required("API_SECRET")?,
            AuthMode::KeyOnly => optional("API_SECRET").unwrap_or_default(),
        };

        let mut exchange = ExchangeConfig::new(base_url, api_key, api_secret);
        exchange.auth = auth;
        if let Some(name) = optional("HEADER_API_KEY") {
            exchange.header_api_key = name;
        }
        if let Some(name) = optional("HEADER_SIGNATURE") {
            exchange.header_signature = name;
        }
        if let Some(name) = optional("HEADER_TIMESTAMP") {
            exchange.header_timestamp = name;
        }

        let defaults = ChainSettings::default();
        let chain = ChainSettings {
            window: parse_ms("SIGNAL_CHAIN_WINDOW_MS", defaults.window)?,
            max_lots_per_order: parse_or("MAX_LOTS_PER_ORDER", defaults.max_lots_per_order)?,
            margin_buffer_pct: parse_or("MARGIN_BUFFER_PCT", defaults.margin_buffer_pct)?,
            default_leverage: parse_or("DEFAULT_LEVERAGE", defaults.default_leverage)?,
            fx_inr_per_usd: parse_or("FX_INR_PER_USD", defaults.fx_inr_per_usd)?,
            flat_timeout: parse_ms("FLAT_TIMEOUT_MS", defaults.flat_timeout)?,
            flat_poll: parse_ms("FLAT_POLL_MS", defaults.flat_poll)?,
            fast_enter: parse_bool("FAST_ENTER", defaults.fast_enter)?,
            fast_enter_wait: parse_ms("FAST_ENTER_WAIT_MS", defaults.fast_enter_wait)?,
            fast_enter_retry: parse_ms("FAST_ENTER_RETRY_MS", defaults.fast_enter_retry)?,
            auto_cancel_on_enter: parse_bool("AUTO_CANCEL_ON_ENTER", defaults.auto_cancel_on_enter)?,
            force_cancel_orders_on_cancel: parse_bool(
                "FORCE_CANCEL_ORDERS_ON_CANCEL",
                defaults.force_cancel_orders_on_cancel,
            )?,
            force_close_on_cancel: parse_bool("FORCE_CLOSE_ON_CANCEL", defaults.force_close_on_cancel)?,
        };

        Ok(Self {
            listen_port: parse_or("PORT", DEFAULT_PORT)?,
            webhook_token: optional("WEBHOOK_TOKEN"),
            strict_sequence: parse_bool("STRICT_SEQUENCE", true)?,
            exchange,
            chain,
        })
    }
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn required(key: &str) -> GatewayResult<String> {
    optional(key).ok_or_else(|| GatewayError::Config(format!("{key} is required")))
}

fn parse_or<T: FromStr>(key: &str, default: T) -> GatewayResult<T> {
    match optional(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| GatewayError::Config(format!("{key} is not valid: {raw}"))),
        None => Ok(default),
    }
}

fn parse_ms(key: &str, default: Duration) -> GatewayResult<Duration> {
    Ok(Duration::from_millis(parse_or(
        key,
        default.as_millis() as u64,
    )?))
}

fn parse_bool(key: &str, default: bool) -> GatewayResult<bool> {
    match optional(key).as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("true") | Some("1") | Some("yes") => Ok(true),
        Some("false") | Some("0") | Some("no") => Ok(false),
        Some(other) => Err(GatewayError::Config(format!("{key} is not a bool: {other}"))),
    }
}
