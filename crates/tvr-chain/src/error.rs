//! Chain dispatch error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain_expired: age {age_ms}ms exceeds window {window_ms}ms")]
    Expired { age_ms: u64, window_ms: u64 },

    #[error("require_flat_timeout: {symbol} not flat in time")]
    RequireFlatTimeout { symbol: String },

    #[error("no open position for {0}")]
    NoOpenPosition(String),

    #[error("batch refused: {total} lots exceed position of {position_lots}")]
    BatchOversized { total: i64, position_lots: i64 },

    #[error("validation: {0}")]
    Validation(String),

    #[error(transparent)]
    Core(#[from] tvr_core::CoreError),

    #[error(transparent)]
    Sizing(#[from] tvr_sizing::SizingError),

    #[error(transparent)]
    Exchange(#[from] tvr_exchange::ExchangeError),
}

pub type ChainResult<T> = std::result::Result<T, ChainError>;
