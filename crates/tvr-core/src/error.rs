//! Error types for tvr-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    #[error("Invalid side: {0}")]
    InvalidSide(String),

    #[error("Invalid sequence: {0}")]
    InvalidSequence(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
