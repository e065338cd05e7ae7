//! Last-entry memo.
//!
//! Remembers the most recent entry per product for a few seconds; the TP
//! normalizer uses it to disambiguate lot-vs-coin sizes. Never used for
//! order placement decisions.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tvr_core::OrderSide;
use tvr_sizing::LastEntryHint;

/// Memo TTL; stale hints are worse than none.
pub const MEMO_TTL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy)]
pub struct EntryMemo {
    pub lots: i64,
    pub side: OrderSide,
    pub lot_mult: Decimal,
    pub at: Instant,
}

/// Per-symbol memo of the last placed entry.
#[derive(Debug, Default)]
pub struct LastEntryMemo {
    entries: HashMap<String, EntryMemo>,
}

impl LastEntryMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, symbol: &str, lots: i64, side: OrderSide, lot_mult: Decimal) {
        self.entries.insert(
            symbol.to_uppercase(),
            EntryMemo {
                lots,
                side,
                lot_mult,
                at: Instant::now(),
            },
        );
    }

    /// Fresh memo for a symbol, if any.
    pub fn get(&mut self, symbol: &str) -> Option<EntryMemo> {
        let symbol = symbol.to_uppercase();
        match self.entries.get(&symbol) {
            Some(memo) if memo.at.elapsed() < MEMO_TTL => Some(*memo),
            Some(_) => {
                self.entries.remove(&symbol);
                None
            }
            None => None,
        }
    }

    /// Sizing hint for the TP normalizer (zero lots when no fresh memo).
    pub fn hint(&mut self, symbol: &str) -> LastEntryHint {
        match self.get(symbol) {
            Some(memo) => LastEntryHint { lots: memo.lots },
            None => LastEntryHint::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_record_and_hint() {
        let mut memo = LastEntryMemo::new();
        memo.record("arcusd", 5, OrderSide::Buy, dec!(10));

        assert_eq!(memo.hint("ARCUSD").lots, 5);
        assert_eq!(memo.hint("other").lots, 0);

        let entry = memo.get("ArcUsd").unwrap();
        assert_eq!(entry.side, OrderSide::Buy);
        assert_eq!(entry.lot_mult, dec!(10));
    }

    #[test]
    fn test_rewrites_keep_latest() {
        let mut memo = LastEntryMemo::new();
        memo.record("X", 5, OrderSide::Buy, dec!(1));
        memo.record("X", 9, OrderSide::Sell, dec!(1));
        assert_eq!(memo.hint("X").lots, 9);
    }
}
