//! Sizing error types.

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SizingError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error("Invalid entry price: {0}")]
    InvalidPrice(Decimal),

    #[error("Invalid lot multiplier: {0}")]
    InvalidLotMult(Decimal),

    #[error("Invalid FX rate: {0}")]
    InvalidFx(Decimal),

    #[error("Take-profit leg {0} has no usable size")]
    MissingLegSize(usize),
}

pub type SizingResult<T> = std::result::Result<T, SizingError>;
