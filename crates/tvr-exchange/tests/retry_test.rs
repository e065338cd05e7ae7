//! Retry behavior against a flaky mock endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use reqwest::Method;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tvr_exchange::{ExchangeClient, ExchangeConfig, ExchangeError};

struct Flaky {
    hits: AtomicU32,
    /// How many leading requests fail with 503.
    fail_first: u32,
}

async fn flaky(State(state): State<Arc<Flaky>>) -> impl IntoResponse {
    let hit = state.hits.fetch_add(1, Ordering::SeqCst) + 1;
    if hit <= state.fail_first {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"success": false, "error": {"code": 503}})),
        )
            .into_response()
    } else {
        Json(json!({"success": true, "result": {"hit": hit}})).into_response()
    }
}

async fn always_bad() -> impl IntoResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"success": false, "error": {"code": "invalid_order"}})),
    )
}

async fn spawn(fail_first: u32) -> (String, Arc<Flaky>) {
    let state = Arc::new(Flaky {
        hits: AtomicU32::new(0),
        fail_first,
    });
    let router = Router::new()
        .route("/v2/products", get(flaky))
        .route("/v2/bad", get(always_bad))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    (format!("http://{addr}"), state)
}

fn client(base: String) -> ExchangeClient {
    ExchangeClient::new(ExchangeConfig::new(base, "k", "s")).unwrap()
}

#[tokio::test]
async fn test_transient_errors_retried_until_success() {
    let (base, state) = spawn(2).await;
    let client = client(base);

    let json = client
        .call(Method::GET, "/v2/products", None, None)
        .await
        .expect("third attempt should succeed");
    assert_eq!(json["result"]["hit"], 3);
    assert_eq!(state.hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retries_exhausted_surface_last_error() {
    let (base, state) = spawn(10).await;
    let client = client(base);

    let err = client
        .call(Method::GET, "/v2/products", None, None)
        .await
        .expect_err("all attempts transient");
    assert!(matches!(err, ExchangeError::Api { status: 503, .. }));
    assert_eq!(state.hits.load(Ordering::SeqCst), 3, "bounded at three attempts");
}

#[tokio::test]
async fn test_non_retryable_fails_immediately() {
    let (base, state) = spawn(0).await;
    let client = client(base);

    let err = client
        .call(Method::GET, "/v2/bad", None, None)
        .await
        .expect_err("400 is not retryable");
    match err {
        ExchangeError::Api { status, body, url, method } => {
            assert_eq!(status, 400);
            assert_eq!(method, "GET");
            assert!(url.ends_with("/v2/bad"));
            assert!(body.contains("invalid_order"));
        }
        other => panic!("unexpected error: {other}"),
    }
    // The counter tracks only /v2/products; /v2/bad is stateless, so just
    // confirm no products calls happened.
    assert_eq!(state.hits.load(Ordering::SeqCst), 0);
}
