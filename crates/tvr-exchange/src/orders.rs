//! Order surfaces: listing, placement, batch placement, cancellation.

use crate::client::ExchangeClient;
use crate::error::ExchangeResult;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use tvr_core::OrderSide;

/// Page size for cursor-paginated order listing.
const ORDERS_PAGE_SIZE: u32 = 200;

/// Order states that count as resting when probing for flatness.
pub const RESTING_STATES: &str = "open,pending,triggered,untriggered";

/// Order states fetched for cancellation sweeps.
pub const CANCELABLE_STATES: &str = "open,pending";

/// One open order row, reduced to the fields the relay touches.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenOrder {
    pub id: i64,
    #[serde(default)]
    pub product_id: Option<i64>,
    #[serde(default)]
    pub product_symbol: Option<String>,
    #[serde(default)]
    pub client_order_id: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

impl OpenOrder {
    pub fn matches_symbol(&self, symbol: &str) -> bool {
        self.product_symbol
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case(symbol))
    }
}

/// One leg of a take-profit batch, serialized verbatim to the exchange.
#[derive(Debug, Clone, Serialize)]
pub struct BatchLeg {
    pub limit_price: String,
    pub size: i64,
    pub side: OrderSide,
    pub order_type: String,
    pub reduce_only: bool,
    pub client_order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mmp: Option<bool>,
}

impl ExchangeClient {
    /// List orders in the given states, following the `meta.after` cursor
    /// until the exchange reports no further page.
    pub async fn list_open_orders(&self, states: &str) -> ExchangeResult<Vec<OpenOrder>> {
        let mut all = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let query = match &after {
                Some(cursor) => format!("states={states}&page_size={ORDERS_PAGE_SIZE}&after={cursor}"),
                None => format!("states={states}&page_size={ORDERS_PAGE_SIZE}"),
            };
            let json = self
                .call(Method::GET, "/v2/orders", Some(&query), None)
                .await?;

            let rows = json
                .get("result")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if rows.is_empty() {
                break;
            }
            for row in rows {
                if let Ok(order) = serde_json::from_value::<OpenOrder>(row) {
                    all.push(order);
                }
            }

            after = json
                .get("meta")
                .and_then(|m| m.get("after"))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            if after.is_none() {
                break;
            }
        }

        debug!(count = all.len(), states, "listed open orders");
        Ok(all)
    }

    /// Place a market order sized in lots.
    pub async fn place_market_order(
        &self,
        product_symbol: &str,
        side: OrderSide,
        size: i64,
        reduce_only: bool,
    ) -> ExchangeResult<Value> {
        let mut body = json!({
            "product_symbol": product_symbol,
            "order_type": "market_order",
            "side": side,
            "size": size,
        });
        if reduce_only {
            body["reduce_only"] = Value::Bool(true);
        }
        self.call(Method::POST, "/v2/orders", None, Some(&body)).await
    }

    /// Place a batch of limit orders.
    pub async fn place_batch_orders(
        &self,
        product_id: i64,
        product_symbol: &str,
        legs: &[BatchLeg],
    ) -> ExchangeResult<Value> {
        let body = json!({
            "product_id": product_id,
            "product_symbol": product_symbol,
            "orders": legs,
        });
        self.call(Method::POST, "/v2/orders/batch", None, Some(&body))
            .await
    }

    /// Cancel one order by id.
    pub async fn cancel_order(&self, order: &OpenOrder, product_id: i64) -> ExchangeResult<()> {
        let mut body = json!({
            "id": order.id,
            "product_id": product_id,
        });
        if let Some(cloid) = &order.client_order_id {
            body["client_order_id"] = Value::String(cloid.clone());
        }
        self.call(Method::DELETE, "/v2/orders", None, Some(&body))
            .await?;
        Ok(())
    }

    /// Cancel every open order across all products.
    pub async fn cancel_all_orders(&self) -> ExchangeResult<()> {
        self.call(Method::DELETE, "/v2/orders/all", None, None).await?;
        Ok(())
    }
}
