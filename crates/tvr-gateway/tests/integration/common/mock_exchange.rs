//! Scriptable mock of the exchange REST API for integration tests.
//!
//! Serves the endpoints the relay touches and records every mutating call
//! so tests can assert on exact request bodies and ordering.

use axum::extract::State;
use axum::response::Json;
use axum::routing::{delete, get, post};
use axum::Router;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// One recorded mutating call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub path: String,
    pub body: Value,
}

/// Shared scriptable state.
#[derive(Default)]
pub struct MockExchangeState {
    /// Product rows served from /v2/products.
    pub products: Mutex<Vec<Value>>,
    /// Position rows served from /v2/positions.
    pub positions: Mutex<Vec<Value>>,
    /// Open order rows served from /v2/orders.
    pub open_orders: Mutex<Vec<Value>>,
    /// Ticker result for /v2/tickers.
    pub ticker: Mutex<Value>,
    /// Position row installed after a non-reduce-only order fills.
    pub entry_fill: Mutex<Option<Value>>,
    /// Every mutating call, in arrival order.
    pub calls: Mutex<Vec<RecordedCall>>,
}

impl MockExchangeState {
    pub fn mutating_calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.path == path)
            .cloned()
            .collect()
    }

    fn record(&self, method: &str, path: &str, body: Value) {
        self.calls.lock().push(RecordedCall {
            method: method.to_string(),
            path: path.to_string(),
            body,
        });
    }
}

/// Running mock exchange.
pub struct MockExchange {
    pub state: Arc<MockExchangeState>,
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl MockExchange {
    /// Start on an ephemeral port with one product.
    ///
    /// `contract_value` feeds the lot-multiplier derivation
    /// (e.g. `"10 ARC"` for a 10-coin lot).
    pub async fn start(symbol: &str, product_id: i64, contract_value: &str) -> Self {
        let state = Arc::new(MockExchangeState::default());
        *state.products.lock() = vec![json!({
            "id": product_id,
            "symbol": symbol,
            "contract_value": contract_value,
        })];
        *state.ticker.lock() = json!({"mark_price": "2.0"});

        let router = Router::new()
            .route("/v2/products", get(get_products))
            .route("/v2/tickers", get(get_tickers))
            .route(
                "/v2/orders",
                get(get_orders).post(post_order).delete(delete_order),
            )
            .route("/v2/orders/batch", post(post_batch))
            .route("/v2/orders/all", delete(delete_all_orders))
            .route("/v2/positions", get(get_positions))
            .route("/v2/positions/margined", get(get_positions))
            .route("/v2/positions/close_all", post(post_close_all))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock exchange");
        let addr = listener.local_addr().expect("mock exchange addr");
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self { state, addr, handle }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Install the position row a successful entry should produce.
    pub fn set_entry_fill(&self, row: Value) {
        *self.state.entry_fill.lock() = Some(row);
    }

    /// Install live position rows directly.
    pub fn set_positions(&self, rows: Vec<Value>) {
        *self.state.positions.lock() = rows;
    }

    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

async fn get_products(State(state): State<Arc<MockExchangeState>>) -> Json<Value> {
    Json(json!({"success": true, "result": *state.products.lock()}))
}

async fn get_tickers(State(state): State<Arc<MockExchangeState>>) -> Json<Value> {
    Json(json!({"success": true, "result": *state.ticker.lock()}))
}

async fn get_orders(State(state): State<Arc<MockExchangeState>>) -> Json<Value> {
    Json(json!({
        "success": true,
        "result": *state.open_orders.lock(),
        "meta": {"after": null},
    }))
}

async fn post_order(
    State(state): State<Arc<MockExchangeState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.record("POST", "/v2/orders", body.clone());

    if body.get("reduce_only").and_then(Value::as_bool) == Some(true) {
        // A reduce-only market order closes whatever is open.
        state.positions.lock().clear();
    } else if let Some(row) = state.entry_fill.lock().clone() {
        *state.positions.lock() = vec![row];
    }
    Json(json!({"success": true, "result": {"id": 1}}))
}

async fn post_batch(
    State(state): State<Arc<MockExchangeState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.record("POST", "/v2/orders/batch", body);
    Json(json!({"success": true, "result": {}}))
}

async fn delete_order(
    State(state): State<Arc<MockExchangeState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.record("DELETE", "/v2/orders", body);
    Json(json!({"success": true, "result": {}}))
}

async fn delete_all_orders(State(state): State<Arc<MockExchangeState>>) -> Json<Value> {
    state.record("DELETE", "/v2/orders/all", Value::Null);
    state.open_orders.lock().clear();
    Json(json!({"success": true, "result": {}}))
}

async fn get_positions(State(state): State<Arc<MockExchangeState>>) -> Json<Value> {
    Json(json!({"success": true, "result": *state.positions.lock()}))
}

async fn post_close_all(State(state): State<Arc<MockExchangeState>>) -> Json<Value> {
    state.record("POST", "/v2/positions/close_all", Value::Null);
    state.positions.lock().clear();
    Json(json!({"success": true, "result": {}}))
}
