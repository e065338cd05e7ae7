//! Position listing and ticker price lookup.

use crate::client::ExchangeClient;
use crate::error::{ExchangeError, ExchangeResult};
use reqwest::Method;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::debug;

/// One position row in whatever shape the exchange returns it.
#[derive(Debug, Clone)]
pub struct PositionRow {
    /// Raw signed size; units (lots vs coins) are inferred downstream.
    pub size: Decimal,
    pub product_id: Option<i64>,
    pub product_symbol: Option<String>,
    pub entry_price: Option<Decimal>,
    pub mark_price: Option<Decimal>,
    pub notional: Option<Decimal>,
}

impl PositionRow {
    fn from_row(row: &Value) -> Option<Self> {
        let size = loose_decimal(row.get("size"))?;
        let product_symbol = row
            .get("product_symbol")
            .and_then(Value::as_str)
            .or_else(|| row.get("product").and_then(|p| p.get("symbol")).and_then(Value::as_str))
            .map(|s| s.to_uppercase());
        let product_id = row
            .get("product_id")
            .and_then(Value::as_i64)
            .or_else(|| row.get("product").and_then(|p| p.get("id")).and_then(Value::as_i64));
        Some(Self {
            size,
            product_id,
            product_symbol,
            entry_price: loose_decimal(row.get("entry_price")),
            mark_price: loose_decimal(row.get("mark_price")),
            notional: loose_decimal(row.get("notional")),
        })
    }

    pub fn matches_symbol(&self, symbol: &str) -> bool {
        self.product_symbol
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case(symbol))
    }

    /// Best available price for unit inference: mark, then entry.
    pub fn reference_price(&self) -> Option<Decimal> {
        self.mark_price.or(self.entry_price)
    }

    pub fn is_open(&self) -> bool {
        !self.size.is_zero()
    }
}

impl ExchangeClient {
    /// List positions; falls back to the margined endpoint when the
    /// primary one is unavailable.
    pub async fn list_positions(&self) -> ExchangeResult<Vec<PositionRow>> {
        let json = match self.call(Method::GET, "/v2/positions", None, None).await {
            Ok(json) => json,
            Err(primary) => {
                debug!(error = %primary, "positions endpoint failed, trying margined");
                self.call(Method::GET, "/v2/positions/margined", None, None)
                    .await?
            }
        };

        let rows = json
            .get("result")
            .and_then(Value::as_array)
            .ok_or_else(|| ExchangeError::Malformed {
                path: "/v2/positions".to_string(),
                detail: "result is not an array".to_string(),
            })?;

        Ok(rows.iter().filter_map(PositionRow::from_row).collect())
    }

    /// Close every open position.
    pub async fn close_all_positions(&self) -> ExchangeResult<()> {
        self.call(
            Method::POST,
            "/v2/positions/close_all",
            None,
            Some(&serde_json::json!({"close_all_portfolio": true})),
        )
        .await?;
        Ok(())
    }

    /// USD price for a symbol from the ticker: first usable of mark_price,
    /// close, spot_price.
    pub async fn ticker_price_usd(&self, symbol: &str) -> ExchangeResult<Decimal> {
        let query = format!("symbol={symbol}");
        let json = self
            .call(Method::GET, "/v2/tickers", Some(&query), None)
            .await?;
        let result = json.get("result").unwrap_or(&Value::Null);

        for key in ["mark_price", "close", "spot_price"] {
            if let Some(price) = loose_decimal(result.get(key)) {
                if price > Decimal::ZERO {
                    return Ok(price);
                }
            }
        }
        Err(ExchangeError::NoPrice(symbol.to_string()))
    }
}

/// Find the position row for a symbol, open or not.
pub fn find_position<'a>(rows: &'a [PositionRow], symbol: &str) -> Option<&'a PositionRow> {
    rows.iter().find(|row| row.matches_symbol(symbol))
}

/// Decimal from a JSON number or numeric string.
fn loose_decimal(v: Option<&Value>) -> Option<Decimal> {
    match v? {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_position_row_loose_fields() {
        let row = PositionRow::from_row(&json!({
            "size": "-50", "product_symbol": "arcusd",
            "entry_price": 2.0, "mark_price": "2.05"
        }))
        .unwrap();
        assert_eq!(row.size, dec!(-50));
        assert!(row.matches_symbol("ARCUSD"));
        assert_eq!(row.reference_price(), Some(dec!(2.05)));
        assert!(row.is_open());
    }

    #[test]
    fn test_position_row_nested_product() {
        let row = PositionRow::from_row(&json!({
            "size": 5, "product": {"id": 27, "symbol": "BTCUSD"}
        }))
        .unwrap();
        assert_eq!(row.product_id, Some(27));
        assert!(row.matches_symbol("btcusd"));
    }

    #[test]
    fn test_zero_size_not_open() {
        let row = PositionRow::from_row(&json!({"size": 0, "product_symbol": "X"})).unwrap();
        assert!(!row.is_open());
    }

    #[test]
    fn test_find_position() {
        let rows = vec![
            PositionRow::from_row(&json!({"size": 1, "product_symbol": "AAA"})).unwrap(),
            PositionRow::from_row(&json!({"size": 2, "product_symbol": "BBB"})).unwrap(),
        ];
        assert_eq!(find_position(&rows, "bbb").unwrap().size, dec!(2));
        assert!(find_position(&rows, "CCC").is_none());
    }
}
