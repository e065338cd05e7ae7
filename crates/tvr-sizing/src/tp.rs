//! Take-profit size normalization and position clamping.
//!
//! Upstream alert templates emit TP sizes in lots or coins interchangeably.
//! A round multiple of the lot multiplier (3000 on a 1000-coin product) is
//! the ambiguous case; the decision tree leans on the last entry memo to
//! break ties.

use crate::error::{SizingError, SizingResult};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use tvr_core::TpLeg;

/// Last-entry context consulted by the normalizer. Zero when no fresh memo.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastEntryHint {
    pub lots: i64,
}

/// Normalize one TP leg's size into lots.
///
/// An explicit positive `size_coins` wins outright; otherwise the ambiguous
/// `size` field runs the decision tree against the lot multiplier and the
/// last-entry hint.
pub fn normalize_tp_size(
    leg: &TpLeg,
    leg_idx: usize,
    lot_mult: Decimal,
    hint: LastEntryHint,
    max_lots_per_order: i64,
) -> SizingResult<i64> {
    let lot_mult = if lot_mult > Decimal::ZERO { lot_mult } else { Decimal::ONE };

    if let Some(coins) = leg.size_coins.filter(|c| *c > Decimal::ZERO) {
        return Ok(to_lots_floor(coins, lot_mult));
    }

    let s = leg
        .size
        .filter(|s| *s > Decimal::ZERO)
        .ok_or(SizingError::MissingLegSize(leg_idx))?;

    let s_int = s.fract().is_zero();
    let last_lots = Decimal::from(hint.lots.max(0));
    let last_coins = last_lots * lot_mult;

    // Large round multiples of the lot multiplier are coins.
    if lot_mult > Decimal::ONE && s_int && s >= lot_mult && (s % lot_mult).is_zero() {
        return Ok(to_lots_floor(s, lot_mult));
    }
    // Small integers near the last entry size are lots.
    if s_int && last_lots > Decimal::ZERO && s <= Decimal::TWO * last_lots {
        return Ok(round_lots(s));
    }
    // Sizes in the vicinity of the last entry's coin total are coins.
    if last_coins > Decimal::ZERO && s >= (last_coins / Decimal::TWO).max(Decimal::TWO * lot_mult) {
        return Ok(to_lots_floor(s, lot_mult));
    }
    // Integers that do not divide the multiplier cannot be coins.
    if lot_mult > Decimal::ONE && s_int && !(s % lot_mult).is_zero() {
        return Ok(round_lots(s));
    }
    // Beyond the per-order cap only a coin count makes sense.
    if lot_mult > Decimal::ONE && s > Decimal::from(max_lots_per_order) {
        return Ok(to_lots_floor(s, lot_mult));
    }

    Ok(round_lots(s))
}

/// Clamp per-leg lot counts so the batch never exceeds the live position.
///
/// Fewer position lots than legs drops the excess legs and pins survivors
/// to 1 lot each. An oversized total is scaled down proportionally, with
/// the rounding remainder distributed round-robin.
pub fn clamp_legs_to_position(lots: &[i64], position_lots: i64) -> Vec<i64> {
    let n = lots.len() as i64;
    if n == 0 || position_lots <= 0 {
        return Vec::new();
    }

    if position_lots < n {
        return vec![1; position_lots as usize];
    }

    let total: i64 = lots.iter().sum();
    if total <= position_lots {
        return lots.to_vec();
    }

    let ratio = Decimal::from(position_lots) / Decimal::from(total);
    let mut scaled: Vec<i64> = lots
        .iter()
        .map(|&l| (Decimal::from(l) * ratio).floor().to_i64().unwrap_or(0))
        .collect();

    let mut sum: i64 = scaled.iter().sum();
    let mut idx = 0usize;
    while sum < position_lots {
        scaled[idx] += 1;
        sum += 1;
        idx = (idx + 1) % scaled.len();
    }
    while sum > position_lots {
        if scaled[idx] > 1 {
            scaled[idx] -= 1;
            sum -= 1;
        }
        idx = (idx + 1) % scaled.len();
    }

    scaled
}

fn to_lots_floor(coins: Decimal, lot_mult: Decimal) -> i64 {
    (coins / lot_mult).floor().to_i64().unwrap_or(1).max(1)
}

fn round_lots(s: Decimal) -> i64 {
    s.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(1)
        .max(1)
}
