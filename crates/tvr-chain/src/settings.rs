//! Dispatch tunables.

use rust_decimal::Decimal;
use std::time::Duration;

/// Runtime knobs for the chain executor. The gateway builds this from the
/// process environment.
#[derive(Debug, Clone)]
pub struct ChainSettings {
    /// Maximum chain age before new legs are rejected.
    pub window: Duration,
    pub max_lots_per_order: i64,
    /// Fraction of notional held back when sizing from a budget.
    pub margin_buffer_pct: Decimal,
    pub default_leverage: u32,
    /// Fallback INR-per-USD rate when the message carries none.
    pub fx_inr_per_usd: Decimal,
    pub flat_timeout: Duration,
    pub flat_poll: Duration,
    pub fast_enter: bool,
    pub fast_enter_wait: Duration,
    pub fast_enter_retry: Duration,
    /// Synthesize a cancel when ENTER arrives with no CANCAL buffered.
    pub auto_cancel_on_enter: bool,
    /// Default for a CANCAL's cancel_orders flag when unspecified.
    pub force_cancel_orders_on_cancel: bool,
    /// Default for a CANCAL's close_position flag when unspecified.
    pub force_close_on_cancel: bool,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(120_000),
            max_lots_per_order: 1000,
            margin_buffer_pct: Decimal::new(3, 2), // 0.03
            default_leverage: 10,
            fx_inr_per_usd: Decimal::from(84),
            flat_timeout: Duration::from_millis(15_000),
            flat_poll: Duration::from_millis(400),
            fast_enter: true,
            fast_enter_wait: Duration::from_millis(2_000),
            fast_enter_retry: Duration::from_millis(8_000),
            auto_cancel_on_enter: true,
            force_cancel_orders_on_cancel: true,
            force_close_on_cancel: true,
        }
    }
}
