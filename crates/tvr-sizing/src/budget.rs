//! Margin budget to lot count conversion.

use crate::error::{SizingError, SizingResult};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tvr_core::Ccy;

/// Inputs for converting a margin budget into a lot count.
#[derive(Debug, Clone, Copy)]
pub struct BudgetInputs {
    pub amount: Decimal,
    pub ccy: Ccy,
    /// Clamped to at least 1.
    pub leverage: u32,
    pub entry_px_usd: Decimal,
    pub lot_mult: Decimal,
    pub fx_inr_per_usd: Decimal,
    /// Fraction of notional held back for fees and slippage (e.g. 0.03).
    pub margin_buffer_pct: Decimal,
    pub max_lots_per_order: i64,
}

/// Convert a margin budget into lots.
///
/// `lots = floor(margin_usd * leverage * (1 - buffer) / (entry_px * lot_mult))`,
/// clamped to `[1, max_lots_per_order]`.
pub fn lots_from_amount(inputs: &BudgetInputs) -> SizingResult<i64> {
    if inputs.amount <= Decimal::ZERO {
        return Err(SizingError::InvalidAmount(inputs.amount));
    }
    if inputs.entry_px_usd <= Decimal::ZERO {
        return Err(SizingError::InvalidPrice(inputs.entry_px_usd));
    }
    if inputs.lot_mult <= Decimal::ZERO {
        return Err(SizingError::InvalidLotMult(inputs.lot_mult));
    }

    let margin_usd = match inputs.ccy {
        Ccy::Usd => inputs.amount,
        Ccy::Inr => {
            if inputs.fx_inr_per_usd <= Decimal::ZERO {
                return Err(SizingError::InvalidFx(inputs.fx_inr_per_usd));
            }
            inputs.amount / inputs.fx_inr_per_usd
        }
    };

    let leverage = Decimal::from(inputs.leverage.max(1));
    let notional_usd = margin_usd * leverage * (Decimal::ONE - inputs.margin_buffer_pct);
    let coins_wanted = notional_usd / inputs.entry_px_usd;
    let lots = (coins_wanted / inputs.lot_mult).floor();

    let lots = lots.to_i64().unwrap_or(inputs.max_lots_per_order);
    Ok(lots.clamp(1, inputs.max_lots_per_order.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn inputs() -> BudgetInputs {
        BudgetInputs {
            amount: dec!(100),
            ccy: Ccy::Usd,
            leverage: 10,
            entry_px_usd: dec!(2.0),
            lot_mult: dec!(10),
            fx_inr_per_usd: dec!(84),
            margin_buffer_pct: dec!(0.03),
            max_lots_per_order: 1000,
        }
    }

    #[test]
    fn test_usd_budget_happy_path() {
        // 100 * 10 * 0.97 / (2.0 * 10) = 48.5 -> 48
        assert_eq!(lots_from_amount(&inputs()).unwrap(), 48);
    }

    #[test]
    fn test_inr_budget_divides_by_fx() {
        let mut i = inputs();
        i.ccy = Ccy::Inr;
        i.amount = dec!(8400); // 100 USD at fx 84
        assert_eq!(lots_from_amount(&i).unwrap(), 48);
    }

    #[test]
    fn test_clamped_to_max_lots() {
        let mut i = inputs();
        i.amount = dec!(1000000);
        assert_eq!(lots_from_amount(&i).unwrap(), 1000);
    }

    #[test]
    fn test_tiny_budget_floors_to_one_lot() {
        let mut i = inputs();
        i.amount = dec!(0.50);
        assert_eq!(lots_from_amount(&i).unwrap(), 1);
    }

    #[test]
    fn test_leverage_clamped_to_one() {
        let mut i = inputs();
        i.leverage = 0;
        // 100 * 1 * 0.97 / 20 = 4.85 -> 4
        assert_eq!(lots_from_amount(&i).unwrap(), 4);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let mut i = inputs();
        i.amount = dec!(0);
        assert!(matches!(lots_from_amount(&i), Err(SizingError::InvalidAmount(_))));

        let mut i = inputs();
        i.entry_px_usd = dec!(-1);
        assert!(matches!(lots_from_amount(&i), Err(SizingError::InvalidPrice(_))));

        let mut i = inputs();
        i.ccy = Ccy::Inr;
        i.fx_inr_per_usd = dec!(0);
        assert!(matches!(lots_from_amount(&i), Err(SizingError::InvalidFx(_))));
    }

    #[test]
    fn test_fractional_lot_mult() {
        let mut i = inputs();
        i.lot_mult = dec!(0.1);
        // 100 * 10 * 0.97 / 2.0 = 485 coins -> 4850 lots -> clamped 1000
        assert_eq!(lots_from_amount(&i).unwrap(), 1000);
    }
}
