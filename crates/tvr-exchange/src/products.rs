//! Product metadata cache.
//!
//! Caches the `/v2/products` snapshot and derives a lot multiplier per
//! symbol. Exchange metadata is unreliable on some products, so multipliers
//! can also be learned at runtime from observed positions, gated against
//! the metadata value.

use crate::client::ExchangeClient;
use crate::error::{ExchangeError, ExchangeResult};
use reqwest::Method;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Products snapshot TTL; the feed is fetched at most this often.
const PRODUCTS_TTL: Duration = Duration::from_secs(300);

/// Learned/derived multiplier entries share the snapshot TTL.
const MULT_TTL: Duration = Duration::from_secs(300);

/// One product row, reduced to the fields the relay uses.
#[derive(Debug, Clone)]
pub struct Product {
    pub id: i64,
    pub symbol: String,
    lot_size: Option<String>,
    contract_size: Option<String>,
    contract_value: Option<String>,
    contract_unit: Option<String>,
    qty_step: Option<String>,
}

impl Product {
    fn from_row(row: &Value) -> Option<Self> {
        Some(Self {
            id: row.get("id")?.as_i64()?,
            symbol: row.get("symbol")?.as_str()?.to_uppercase(),
            lot_size: field_string(row, "lot_size"),
            contract_size: field_string(row, "contract_size"),
            contract_value: field_string(row, "contract_value"),
            contract_unit: field_string(row, "contract_unit"),
            qty_step: field_string(row, "qty_step"),
        })
    }

    /// Lot multiplier from metadata: first well-formed of
    /// lot_size / contract_size / contract_value / contract_unit, then
    /// qty_step if at least 1, then 1.
    pub fn metadata_lot_mult(&self) -> Decimal {
        for field in [
            &self.lot_size,
            &self.contract_size,
            &self.contract_value,
            &self.contract_unit,
        ] {
            if let Some(m) = field.as_deref().and_then(first_numeric_token) {
                if m > Decimal::ZERO {
                    return m;
                }
            }
        }
        if let Some(step) = self.qty_step.as_deref().and_then(first_numeric_token) {
            if step >= Decimal::ONE {
                return step;
            }
        }
        Decimal::ONE
    }
}

#[derive(Debug, Clone, Copy)]
struct MultEntry {
    m: Decimal,
    ts: Instant,
    learned: bool,
}

struct Snapshot {
    fetched_at: Instant,
    products: HashMap<String, Product>,
}

struct CacheInner {
    snapshot: Option<Snapshot>,
    mults: HashMap<String, MultEntry>,
}

/// Product metadata cache with runtime lot-multiplier learning.
pub struct ProductCache {
    client: Arc<ExchangeClient>,
    inner: Mutex<CacheInner>,
}

impl ProductCache {
    pub fn new(client: Arc<ExchangeClient>) -> Self {
        Self {
            client,
            inner: Mutex::new(CacheInner {
                snapshot: None,
                mults: HashMap::new(),
            }),
        }
    }

    /// Numeric product id for a symbol.
    pub async fn product_id(&self, symbol: &str) -> ExchangeResult<i64> {
        let symbol = symbol.to_uppercase();
        let mut inner = self.inner.lock().await;
        self.ensure_snapshot(&mut inner).await?;
        inner
            .snapshot
            .as_ref()
            .and_then(|s| s.products.get(&symbol))
            .map(|p| p.id)
            .ok_or_else(|| ExchangeError::ProductNotFound(symbol))
    }

    /// Lot multiplier for a symbol (always positive; 1 when unknown).
    pub async fn lot_mult(&self, symbol: &str) -> ExchangeResult<Decimal> {
        let symbol = symbol.to_uppercase();
        let mut inner = self.inner.lock().await;

        if let Some(entry) = inner.mults.get(&symbol) {
            if entry.ts.elapsed() < MULT_TTL {
                if entry.learned {
                    debug!(symbol = %symbol, m = %entry.m, "using learned lot_mult");
                }
                return Ok(entry.m);
            }
        }

        self.ensure_snapshot(&mut inner).await?;
        let m = match inner.snapshot.as_ref().and_then(|s| s.products.get(&symbol)) {
            Some(product) => product.metadata_lot_mult(),
            None => {
                warn!(symbol = %symbol, "product missing from snapshot, lot_mult defaults to 1");
                Decimal::ONE
            }
        };
        inner.mults.insert(
            symbol,
            MultEntry { m, ts: Instant::now(), learned: false },
        );
        Ok(m)
    }

    /// Offer a runtime-observed multiplier candidate (observed coin
    /// magnitude / lots just sent).
    ///
    /// Accepted when the candidate is integer-near or a proper fraction
    /// and sits within 50 % of the metadata-derived value; anything else is
    /// rejected so one bad position row cannot poison sizing.
    ///
    /// Returns whether the candidate was accepted.
    pub async fn learn_lot_mult(&self, symbol: &str, candidate: Decimal) -> ExchangeResult<bool> {
        let symbol = symbol.to_uppercase();
        if candidate <= Decimal::ZERO {
            return Ok(false);
        }

        let mut inner = self.inner.lock().await;
        self.ensure_snapshot(&mut inner).await?;
        let meta = inner
            .snapshot
            .as_ref()
            .and_then(|s| s.products.get(&symbol))
            .map(|p| p.metadata_lot_mult())
            .unwrap_or(Decimal::ONE);

        let shape_ok = is_integer_near(candidate) || candidate < Decimal::ONE;
        let within_half = (candidate - meta).abs() / meta <= Decimal::new(5, 1);

        if !(shape_ok && within_half) {
            warn!(
                symbol = %symbol, candidate = %candidate, metadata = %meta,
                "lot_mult_learn_rejected"
            );
            return Ok(false);
        }

        let m = if is_integer_near(candidate) { candidate.round() } else { candidate };
        info!(symbol = %symbol, learned = %m, metadata = %meta, "lot_mult_learned");
        inner.mults.insert(
            symbol,
            MultEntry { m, ts: Instant::now(), learned: true },
        );
        Ok(true)
    }

    async fn ensure_snapshot(&self, inner: &mut CacheInner) -> ExchangeResult<()> {
        if let Some(snapshot) = &inner.snapshot {
            if snapshot.fetched_at.elapsed() < PRODUCTS_TTL {
                return Ok(());
            }
        }

        let json = self
            .client
            .call(Method::GET, "/v2/products", None, None)
            .await?;
        let rows = json
            .get("result")
            .and_then(Value::as_array)
            .ok_or_else(|| ExchangeError::Malformed {
                path: "/v2/products".to_string(),
                detail: "result is not an array".to_string(),
            })?;

        let products: HashMap<String, Product> = rows
            .iter()
            .filter_map(Product::from_row)
            .map(|p| (p.symbol.clone(), p))
            .collect();
        debug!(count = products.len(), "products snapshot refreshed");

        inner.snapshot = Some(Snapshot {
            fetched_at: Instant::now(),
            products,
        });
        Ok(())
    }
}

fn field_string(row: &Value, key: &str) -> Option<String> {
    match row.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// First numeric token in a possibly-mixed string (`"10 ARC"` → 10).
fn first_numeric_token(s: &str) -> Option<Decimal> {
    let start = s.find(|c: char| c.is_ascii_digit() || c == '.')?;
    let rest = &s[start..];
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

fn is_integer_near(d: Decimal) -> bool {
    (d - d.round()).abs() <= Decimal::new(1, 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_first_numeric_token() {
        assert_eq!(first_numeric_token("10 ARC"), Some(dec!(10)));
        assert_eq!(first_numeric_token("0.1 LINK"), Some(dec!(0.1)));
        assert_eq!(first_numeric_token("1000"), Some(dec!(1000)));
        assert_eq!(first_numeric_token("ARC 25"), Some(dec!(25)));
        assert_eq!(first_numeric_token("no digits"), None);
    }

    #[test]
    fn test_metadata_lot_mult_field_priority() {
        let p = Product::from_row(&json!({
            "id": 1, "symbol": "arcusd",
            "contract_value": "10 ARC", "contract_unit": "ARC", "qty_step": "1"
        }))
        .unwrap();
        assert_eq!(p.symbol, "ARCUSD");
        assert_eq!(p.metadata_lot_mult(), dec!(10));

        let p = Product::from_row(&json!({
            "id": 2, "symbol": "LINKUSD", "contract_value": "0.1 LINK"
        }))
        .unwrap();
        assert_eq!(p.metadata_lot_mult(), dec!(0.1));
    }

    #[test]
    fn test_metadata_lot_mult_qty_step_fallback() {
        // qty_step below 1 is ignored, >= 1 is used.
        let p = Product::from_row(&json!({"id": 3, "symbol": "X", "qty_step": "0.001"})).unwrap();
        assert_eq!(p.metadata_lot_mult(), dec!(1));

        let p = Product::from_row(&json!({"id": 3, "symbol": "X", "qty_step": 5})).unwrap();
        assert_eq!(p.metadata_lot_mult(), dec!(5));
    }

    #[test]
    fn test_metadata_lot_mult_defaults_to_one() {
        let p = Product::from_row(&json!({"id": 4, "symbol": "Y"})).unwrap();
        assert_eq!(p.metadata_lot_mult(), dec!(1));

        // Unparseable junk falls through too.
        let p = Product::from_row(&json!({"id": 5, "symbol": "Z", "lot_size": "n/a"})).unwrap();
        assert_eq!(p.metadata_lot_mult(), dec!(1));
    }

    #[test]
    fn test_is_integer_near() {
        assert!(is_integer_near(dec!(10)));
        assert!(is_integer_near(dec!(9.995)));
        assert!(!is_integer_near(dec!(9.5)));
        assert!(!is_integer_near(dec!(0.5)));
    }
}
