//! Position size unit inference.
//!
//! The exchange reports position sizes in lots on some products and coins
//! on others, with no flag saying which. The classifier below combines the
//! notional (when present) with divisibility heuristics.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// Units a raw position size is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionUnits {
    Lots,
    Coins,
    Unknown,
}

impl fmt::Display for PositionUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lots => write!(f, "lots"),
            Self::Coins => write!(f, "coins"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Classification of a live position's raw size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InferredPosition {
    pub units: PositionUnits,
    /// Normalized magnitude in lots, at least 1 for a non-zero position.
    pub lots: i64,
}

/// Relative-error threshold under which the notional estimate is trusted.
const NOTIONAL_REL_ERR_MAX: Decimal = Decimal::from_parts(25, 0, 0, false, 2); // 0.25

/// Infer the units of a raw position size.
///
/// When the row carries a notional and a price, the size is compared to the
/// implied lots and coins estimates and the closer one wins (if within 25 %).
/// Otherwise divisibility against `lot_mult` decides.
pub fn infer_position_units(
    raw_size: Decimal,
    lot_mult: Decimal,
    notional: Option<Decimal>,
    price: Option<Decimal>,
) -> InferredPosition {
    let magnitude = raw_size.abs();
    if magnitude.is_zero() {
        return InferredPosition { units: PositionUnits::Unknown, lots: 0 };
    }
    let lot_mult = if lot_mult > Decimal::ZERO { lot_mult } else { Decimal::ONE };

    if let Some(units) = classify_by_notional(magnitude, lot_mult, notional, price) {
        return normalized(units, magnitude, lot_mult);
    }

    let is_integer = magnitude.fract().is_zero();
    let units = if lot_mult > Decimal::ONE {
        if is_integer && !(magnitude % lot_mult).is_zero() {
            PositionUnits::Lots
        } else {
            // Divisible, fractional, or implausibly large as a lot count:
            // on multi-coin products these all read as coins.
            PositionUnits::Coins
        }
    } else {
        PositionUnits::Lots
    };

    normalized(units, magnitude, lot_mult)
}

fn classify_by_notional(
    magnitude: Decimal,
    lot_mult: Decimal,
    notional: Option<Decimal>,
    price: Option<Decimal>,
) -> Option<PositionUnits> {
    let notional = notional.filter(|n| *n > Decimal::ZERO)?;
    let price = price.filter(|p| *p > Decimal::ZERO)?;

    let coins_est = notional / price;
    let lots_est = coins_est / lot_mult;

    let lots_err = rel_err(magnitude, lots_est)?;
    let coins_err = rel_err(magnitude, coins_est)?;

    let (units, err) = if lots_err <= coins_err {
        (PositionUnits::Lots, lots_err)
    } else {
        (PositionUnits::Coins, coins_err)
    };

    (err < NOTIONAL_REL_ERR_MAX).then_some(units)
}

fn rel_err(observed: Decimal, estimate: Decimal) -> Option<Decimal> {
    if estimate <= Decimal::ZERO {
        return None;
    }
    Some((observed - estimate).abs() / estimate)
}

fn normalized(units: PositionUnits, magnitude: Decimal, lot_mult: Decimal) -> InferredPosition {
    let lots = match units {
        PositionUnits::Coins => (magnitude / lot_mult).round(),
        _ => magnitude.round(),
    };
    InferredPosition {
        units,
        lots: lots.to_i64().unwrap_or(1).max(1),
    }
}
