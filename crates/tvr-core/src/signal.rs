//! Inbound signal messages.
//!
//! Upstream webhook bodies are heterogeneous JSON: field names vary by
//! alert template version and numbers arrive as numbers or strings. This
//! module parses a raw `serde_json::Value` once at ingress into a typed
//! message: a shared envelope plus a per-step payload.

use crate::error::{CoreError, Result};
use crate::ids;
use crate::order::{OrderSide, Scope};
use crate::symbol::normalize_symbol;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Protocol step within a signal chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    Cancal,
    Enter,
    BatchTps,
}

impl Step {
    /// Wire sequence number for this step.
    pub fn seq(&self) -> u8 {
        match self {
            Self::Cancal => 0,
            Self::Enter => 1,
            Self::BatchTps => 2,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancal => write!(f, "CANCAL"),
            Self::Enter => write!(f, "ENTER"),
            Self::BatchTps => write!(f, "BATCH_TPS"),
        }
    }
}

/// Budget currency for ENTER sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Ccy {
    Inr,
    Usd,
}

/// Margin budget carried by an ENTER message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Budget {
    pub amount: Decimal,
    pub ccy: Ccy,
}

/// CANCAL payload: flatten flags.
#[derive(Debug, Clone, Default)]
pub struct CancalPayload {
    /// Cancel open orders; `None` falls back to the configured default.
    pub cancel_orders: Option<bool>,
    /// Close the position; `None` falls back to the configured default.
    pub close_position: Option<bool>,
    /// Scope override for the order-cancel half only.
    pub cancel_orders_scope: Option<Scope>,
    /// On a per-order cancel failure, fall back to cancel-all.
    pub cancel_fallback_all: bool,
    /// Wait until flat after flattening.
    pub require_flat: bool,
}

/// ENTER payload: side plus sizing inputs and preflight flags.
#[derive(Debug, Clone)]
pub struct EnterPayload {
    pub side: OrderSide,
    /// Explicit size in lots.
    pub qty: Option<i64>,
    /// Margin budget; converted to lots against entry price and leverage.
    pub budget: Option<Budget>,
    pub leverage: Option<u32>,
    /// Entry price hint in USD; ticker fallback when absent.
    pub entry: Option<Decimal>,
    /// INR per USD; config fallback when absent.
    pub fx_inr_per_usd: Option<Decimal>,
    /// Preflight: cancel open orders before entering.
    pub cancel_orders: bool,
    /// Preflight: close any position before entering.
    pub close_position: bool,
    /// Require a flat book before entering; `None` means the ENTER default (true).
    pub require_flat: Option<bool>,
}

/// One take-profit leg as received.
#[derive(Debug, Clone)]
pub struct TpLeg {
    /// Pass-through price string, sent to the exchange verbatim.
    pub limit_price: String,
    /// Ambiguous size field (lots or coins, inferred later).
    pub size: Option<Decimal>,
    /// Explicit coin size; wins over `size` when positive.
    pub size_coins: Option<Decimal>,
    pub post_only: Option<bool>,
    pub mmp: Option<bool>,
    pub client_order_id: Option<String>,
}

/// BATCH_TPS payload.
#[derive(Debug, Clone)]
pub struct BatchPayload {
    pub legs: Vec<TpLeg>,
}

/// Per-step payload.
#[derive(Debug, Clone)]
pub enum SignalPayload {
    Cancal(CancalPayload),
    Enter(EnterPayload),
    BatchTps(BatchPayload),
}

/// A parsed, actionable signal message.
#[derive(Debug, Clone)]
pub struct SignalMessage {
    pub sig_id: String,
    pub seq: u8,
    /// Normalized product symbol; empty only for `scope=ALL` messages.
    pub product_symbol: String,
    pub scope: Scope,
    pub payload: SignalPayload,
    /// Raw serialized `orders` array, kept for fingerprinting.
    pub orders_json: Option<String>,
}

impl SignalMessage {
    pub fn step(&self) -> Step {
        match self.payload {
            SignalPayload::Cancal(_) => Step::Cancal,
            SignalPayload::Enter(_) => Step::Enter,
            SignalPayload::BatchTps(_) => Step::BatchTps,
        }
    }

    /// Chain key: digest of `(sig_id, UPPER(product_symbol))`.
    pub fn sig_key(&self) -> String {
        ids::sig_key(&self.sig_id, &self.product_symbol)
    }

    /// Dedup fingerprint for this delivery.
    pub fn fingerprint(&self) -> String {
        ids::fingerprint(
            &self.sig_id,
            &self.product_symbol,
            self.seq,
            self.orders_json.as_deref(),
        )
    }

    /// Serialization key for the per-key work queue.
    pub fn queue_key(&self) -> String {
        if self.scope.is_all() {
            "GLOBAL".to_string()
        } else {
            format!("SYM:{}", self.product_symbol)
        }
    }
}

/// Outcome of parsing one webhook body.
#[derive(Debug)]
pub enum ParsedSignal {
    Actionable(Box<SignalMessage>),
    /// Acknowledged but not dispatched (EXIT, legacy aliases, strict-mode drops).
    Ignored { reason: String },
}

/// Parse one webhook body.
///
/// `strict_sequence` requires `sig_id` and a matching `seq` on every
/// message; without it, `seq` is inferred from the action and a missing
/// `sig_id` falls back to `"LEGACY"` so V1 senders still form chains.
pub fn parse_signal(raw: &Value, strict_sequence: bool) -> Result<ParsedSignal> {
    let action = match get_str(raw, &["action"]) {
        Some(a) => a.trim().to_uppercase(),
        None => return Err(CoreError::InvalidSignal("missing action".into())),
    };

    let step = match action.as_str() {
        "CANCAL" => Step::Cancal,
        "ENTER" => Step::Enter,
        "BATCH_TPS" => Step::BatchTps,
        // EXIT and the V1 aliases are acknowledged without dispatch; the
        // upstream may be mid-upgrade, so unknown actions are dropped the
        // same way rather than erroring.
        other => {
            return Ok(ParsedSignal::Ignored {
                reason: format!("unsupported_action:{other}"),
            })
        }
    };

    let sig_id = get_str(raw, &["sig_id", "signal_id"]);
    let seq = get_u64(raw, &["seq"])?;

    let sig_id = match (sig_id, strict_sequence) {
        (Some(s), _) if !s.trim().is_empty() => s.trim().to_string(),
        (_, true) => {
            return Ok(ParsedSignal::Ignored {
                reason: "missing sig_id".into(),
            })
        }
        (_, false) => "LEGACY".to_string(),
    };

    let seq = match (seq, strict_sequence) {
        (Some(n), _) => {
            if n > 2 {
                return Err(CoreError::InvalidSequence(format!("seq out of range: {n}")));
            }
            let n = n as u8;
            if n != step.seq() {
                return Err(CoreError::InvalidSequence(format!(
                    "seq {n} does not match action {step}"
                )));
            }
            n
        }
        (None, true) => {
            return Ok(ParsedSignal::Ignored {
                reason: "missing seq".into(),
            })
        }
        (None, false) => step.seq(),
    };

    let scope = if get_str(raw, &["scope"]).map(|s| s.to_uppercase()) == Some("ALL".to_string())
        || get_bool(raw, &["close_all"]).unwrap_or(false)
    {
        Scope::All
    } else {
        Scope::Symbol
    };

    let product_symbol = get_str(raw, &["symbol", "product_symbol"])
        .map(|s| normalize_symbol(&s))
        .unwrap_or_default();
    if product_symbol.is_empty() && scope == Scope::Symbol {
        return Err(CoreError::InvalidSignal("missing product_symbol".into()));
    }

    let mut orders_json = None;
    let payload = match step {
        Step::Cancal => SignalPayload::Cancal(CancalPayload {
            cancel_orders: get_bool(raw, &["cancel_orders"]),
            close_position: get_bool(raw, &["close_position"]),
            cancel_orders_scope: match get_str(raw, &["cancel_orders_scope"])
                .map(|s| s.to_uppercase())
                .as_deref()
            {
                Some("ALL") => Some(Scope::All),
                Some("SYMBOL") => Some(Scope::Symbol),
                _ => None,
            },
            cancel_fallback_all: get_bool(raw, &["cancel_fallback_all"]).unwrap_or(false),
            require_flat: get_bool(raw, &["require_flat"]).unwrap_or(false),
        }),
        Step::Enter => {
            let side = get_str(raw, &["side"])
                .ok_or_else(|| CoreError::InvalidSignal("ENTER requires side".into()))?
                .parse::<OrderSide>()?;

            let qty = match get_i64(raw, &["qty"])? {
                Some(q) if q <= 0 => {
                    return Err(CoreError::InvalidSignal(format!("qty must be positive: {q}")))
                }
                q => q,
            };

            let budget = parse_budget(raw)?;

            SignalPayload::Enter(EnterPayload {
                side,
                qty,
                budget,
                leverage: get_u64(raw, &["leverage"])?.map(|l| l as u32),
                entry: get_decimal(raw, &["entry"])?,
                fx_inr_per_usd: get_decimal(raw, &["fxQuoteToINR", "fx_quote_to_inr", "fx"])?,
                cancel_orders: get_bool(raw, &["cancel_orders"]).unwrap_or(false),
                close_position: get_bool(raw, &["close_position"]).unwrap_or(false),
                require_flat: get_bool(raw, &["require_flat"]),
            })
        }
        Step::BatchTps => {
            let orders = raw
                .get("orders")
                .and_then(Value::as_array)
                .filter(|a| !a.is_empty())
                .ok_or_else(|| {
                    CoreError::InvalidSignal("BATCH_TPS requires a non-empty orders array".into())
                })?;

            orders_json = serde_json::to_string(orders).ok();

            let legs = orders
                .iter()
                .enumerate()
                .map(|(i, leg)| parse_leg(leg, i))
                .collect::<Result<Vec<_>>>()?;

            SignalPayload::BatchTps(BatchPayload { legs })
        }
    };

    Ok(ParsedSignal::Actionable(Box::new(SignalMessage {
        sig_id,
        seq,
        product_symbol,
        scope,
        payload,
        orders_json,
    })))
}

fn parse_budget(raw: &Value) -> Result<Option<Budget>> {
    if let Some(amount) = get_decimal(raw, &["amount_usd"])? {
        return Ok(Some(Budget { amount, ccy: Ccy::Usd }));
    }
    if let Some(amount) = get_decimal(raw, &["amount_inr"])? {
        return Ok(Some(Budget { amount, ccy: Ccy::Inr }));
    }
    let Some(amount) = get_decimal(raw, &["amount", "order_amount"])? else {
        return Ok(None);
    };
    // Bare amounts default to INR; USD budgets must say so.
    let ccy = match get_str(raw, &["amount_ccy"]).map(|s| s.to_uppercase()).as_deref() {
        Some("USD") => Ccy::Usd,
        _ => Ccy::Inr,
    };
    Ok(Some(Budget { amount, ccy }))
}

fn parse_leg(leg: &Value, idx: usize) -> Result<TpLeg> {
    let limit_price = get_str(leg, &["limit_price", "price", "lmt_price"])
        .ok_or_else(|| CoreError::InvalidSignal(format!("orders[{idx}] missing limit_price")))?;

    Ok(TpLeg {
        limit_price,
        size: get_decimal(leg, &["size"])?,
        size_coins: get_decimal(leg, &["size_coins", "coins"])?,
        post_only: get_bool(leg, &["post_only"]),
        mmp: get_bool(leg, &["mmp"]),
        client_order_id: get_str(leg, &["client_order_id"]),
    })
}

// Tolerant field readers: upstream templates send numbers as numbers or
// strings, and booleans as bools, 0/1, or "true"/"false".

fn get_str(v: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        match v.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => continue,
        }
    }
    None
}

fn get_decimal(v: &Value, keys: &[&str]) -> Result<Option<Decimal>> {
    for key in keys {
        match v.get(key) {
            Some(Value::Number(n)) => return Ok(Some(n.to_string().parse::<Decimal>()?)),
            Some(Value::String(s)) if !s.trim().is_empty() => {
                return Ok(Some(s.trim().parse::<Decimal>().map_err(|_| {
                    CoreError::InvalidSignal(format!("{key} is not numeric: {s}"))
                })?))
            }
            _ => continue,
        }
    }
    Ok(None)
}

fn get_i64(v: &Value, keys: &[&str]) -> Result<Option<i64>> {
    match get_decimal(v, keys)? {
        Some(d) => d
            .trunc()
            .to_i64()
            .map(Some)
            .ok_or_else(|| CoreError::InvalidSignal(format!("integer out of range: {d}"))),
        None => Ok(None),
    }
}

fn get_u64(v: &Value, keys: &[&str]) -> Result<Option<u64>> {
    match get_i64(v, keys)? {
        Some(n) if n < 0 => Err(CoreError::InvalidSignal(format!("expected unsigned: {n}"))),
        Some(n) => Ok(Some(n as u64)),
        None => Ok(None),
    }
}

fn get_bool(v: &Value, keys: &[&str]) -> Option<bool> {
    for key in keys {
        match v.get(key) {
            Some(Value::Bool(b)) => return Some(*b),
            Some(Value::Number(n)) => return Some(n.as_i64() != Some(0)),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => return Some(true),
                "false" | "0" | "no" => return Some(false),
                _ => continue,
            },
            _ => continue,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn actionable(v: Value) -> SignalMessage {
        match parse_signal(&v, true).unwrap() {
            ParsedSignal::Actionable(msg) => *msg,
            other => panic!("expected actionable, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_cancal() {
        let msg = actionable(json!({
            "action": "CANCAL", "sig_id": "S1", "seq": 0,
            "product_symbol": "DELTA:ARCUSD.P",
            "cancel_orders": true, "close_position": "false",
            "require_flat": 1
        }));
        assert_eq!(msg.step(), Step::Cancal);
        assert_eq!(msg.product_symbol, "ARCUSD");
        assert_eq!(msg.queue_key(), "SYM:ARCUSD");
        let SignalPayload::Cancal(p) = &msg.payload else { panic!() };
        assert_eq!(p.cancel_orders, Some(true));
        assert_eq!(p.close_position, Some(false));
        assert!(p.require_flat);
    }

    #[test]
    fn test_parse_enter_with_string_numbers() {
        let msg = actionable(json!({
            "action": "ENTER", "sig_id": "S1", "seq": "1",
            "symbol": "ARCUSD", "side": "buy",
            "amount_usd": "100", "leverage": "10", "entry": "2.0"
        }));
        assert_eq!(msg.step(), Step::Enter);
        let SignalPayload::Enter(p) = &msg.payload else { panic!() };
        assert_eq!(p.side, OrderSide::Buy);
        let budget = p.budget.unwrap();
        assert_eq!(budget.amount, dec!(100));
        assert_eq!(budget.ccy, Ccy::Usd);
        assert_eq!(p.leverage, Some(10));
        assert_eq!(p.entry, Some(dec!(2.0)));
    }

    #[test]
    fn test_bare_amount_defaults_to_inr() {
        let msg = actionable(json!({
            "action": "ENTER", "sig_id": "S1", "seq": 1,
            "symbol": "ARCUSD", "side": "sell", "amount": 5000
        }));
        let SignalPayload::Enter(p) = &msg.payload else { panic!() };
        assert_eq!(p.budget.unwrap().ccy, Ccy::Inr);
    }

    #[test]
    fn test_parse_batch_legs() {
        let msg = actionable(json!({
            "action": "BATCH_TPS", "sig_id": "S1", "seq": 2, "symbol": "ARCUSD",
            "orders": [
                {"limit_price": "2.1", "size": 30},
                {"price": 2.2, "coins": "20", "post_only": true}
            ]
        }));
        let SignalPayload::BatchTps(p) = &msg.payload else { panic!() };
        assert_eq!(p.legs.len(), 2);
        assert_eq!(p.legs[0].limit_price, "2.1");
        assert_eq!(p.legs[0].size, Some(dec!(30)));
        assert_eq!(p.legs[1].limit_price, "2.2");
        assert_eq!(p.legs[1].size_coins, Some(dec!(20)));
        assert_eq!(p.legs[1].post_only, Some(true));
        assert!(msg.orders_json.is_some());
    }

    #[test]
    fn test_strict_drops_missing_sig_id_and_seq() {
        let dropped = parse_signal(
            &json!({"action": "ENTER", "symbol": "ARCUSD", "side": "buy", "seq": 1}),
            true,
        )
        .unwrap();
        assert!(matches!(dropped, ParsedSignal::Ignored { ref reason } if reason.contains("sig_id")));

        let dropped = parse_signal(
            &json!({"action": "ENTER", "sig_id": "S1", "symbol": "ARCUSD", "side": "buy"}),
            true,
        )
        .unwrap();
        assert!(matches!(dropped, ParsedSignal::Ignored { ref reason } if reason.contains("seq")));
    }

    #[test]
    fn test_non_strict_infers_seq_and_sig_id() {
        let msg = match parse_signal(
            &json!({"action": "BATCH_TPS", "symbol": "ARCUSD",
                    "orders": [{"limit_price": "1", "size": 1}]}),
            false,
        )
        .unwrap()
        {
            ParsedSignal::Actionable(m) => *m,
            other => panic!("{other:?}"),
        };
        assert_eq!(msg.seq, 2);
        assert_eq!(msg.sig_id, "LEGACY");
    }

    #[test]
    fn test_seq_action_mismatch_rejected() {
        let err = parse_signal(
            &json!({"action": "ENTER", "sig_id": "S1", "seq": 0,
                    "symbol": "ARCUSD", "side": "buy"}),
            true,
        );
        assert!(err.is_err());

        let err = parse_signal(
            &json!({"action": "CANCAL", "sig_id": "S1", "seq": 7, "symbol": "ARCUSD"}),
            true,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_exit_and_legacy_aliases_ignored() {
        for action in ["EXIT", "DELTA_CANCEL_ALL", "CANCEL_ALL", "CLOSE_POSITION", "FLIP"] {
            let out = parse_signal(&json!({"action": action, "symbol": "ARCUSD"}), true).unwrap();
            assert!(matches!(out, ParsedSignal::Ignored { .. }), "{action}");
        }
    }

    #[test]
    fn test_scope_all_without_symbol() {
        let msg = actionable(json!({
            "action": "CANCAL", "sig_id": "S9", "seq": 0, "scope": "ALL"
        }));
        assert_eq!(msg.scope, Scope::All);
        assert_eq!(msg.queue_key(), "GLOBAL");

        // close_all implies ALL too.
        let msg = actionable(json!({
            "action": "CANCAL", "sig_id": "S9", "seq": 0, "close_all": true
        }));
        assert_eq!(msg.scope, Scope::All);
    }

    #[test]
    fn test_missing_symbol_rejected_for_symbol_scope() {
        let err = parse_signal(&json!({"action": "CANCAL", "sig_id": "S1", "seq": 0}), true);
        assert!(err.is_err());
    }

    #[test]
    fn test_fingerprint_distinguishes_batch_orders() {
        let a = actionable(json!({
            "action": "BATCH_TPS", "sig_id": "S1", "seq": 2, "symbol": "ARCUSD",
            "orders": [{"limit_price": "2.1", "size": 30}]
        }));
        let b = actionable(json!({
            "action": "BATCH_TPS", "sig_id": "S1", "seq": 2, "symbol": "ARCUSD",
            "orders": [{"limit_price": "2.2", "size": 30}]
        }));
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
