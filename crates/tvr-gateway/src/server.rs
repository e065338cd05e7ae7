//! HTTP ingress using axum.
//!
//! `POST /tv` takes webhook bodies; health and debug surfaces are read-only.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tvr_chain::{ChainError, DispatchOutcome, Dispatcher};
use tvr_core::{parse_signal, ParsedSignal};

/// Header carrying the webhook token.
const TOKEN_HEADER: &str = "x-webhook-token";

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub webhook_token: Option<String>,
    pub strict_sequence: bool,
    pub started_at: Instant,
}

/// Create the axum router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/tv", post(post_tv))
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/debug/seen", get(debug_seen))
        .route("/debug/chain", get(debug_chain))
        .with_state(state)
}

/// Webhook ingress.
async fn post_tv(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(expected) = &state.webhook_token {
        let presented = headers
            .get(TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if presented != expected {
            warn!("webhook token mismatch");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"ok": false, "error": "unauthorized"})),
            )
                .into_response();
        }
    }

    let msg = match parse_signal(&body, state.strict_sequence) {
        Ok(ParsedSignal::Actionable(msg)) => *msg,
        Ok(ParsedSignal::Ignored { reason }) => {
            info!(reason = %reason, "delivery acknowledged without dispatch");
            return Json(json!({"ok": true, "ignored": reason})).into_response();
        }
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"ok": false, "error": e.to_string()})),
            )
                .into_response()
        }
    };

    match state.dispatcher.handle(msg).await {
        Ok(DispatchOutcome::Dedup) => Json(json!({"ok": true, "dedup": true})).into_response(),
        Ok(DispatchOutcome::Queued {
            waiting_for,
            have,
            did,
            progressed,
        }) => Json(json!({
            "ok": true,
            "queued": format!("waiting_for_{waiting_for}"),
            "have": have,
            "did": did,
            "progressed": progressed,
        }))
        .into_response(),
        Ok(DispatchOutcome::Summary(summary)) => Json(json!({
            "ok": true,
            "status": summary.status,
            "have": summary.have,
            "did": summary.did,
            "progressed": summary.progressed,
        }))
        .into_response(),
        Err(e) => dispatch_error(e),
    }
}

fn dispatch_error(e: ChainError) -> Response {
    let payload = match &e {
        ChainError::Expired { age_ms, window_ms } => json!({
            "ok": false,
            "error": "chain_expired",
            "age_ms": age_ms,
            "window_ms": window_ms,
        }),
        ChainError::RequireFlatTimeout { symbol } => json!({
            "ok": false,
            "error": "require_flat_timeout",
            "symbol": symbol,
        }),
        ChainError::NoOpenPosition(symbol) => json!({
            "ok": false,
            "error": format!("no open position for {symbol}"),
        }),
        other => json!({"ok": false, "error": other.to_string()}),
    };
    warn!(error = %e, "dispatch failed");
    (StatusCode::BAD_REQUEST, Json(payload)).into_response()
}

/// Liveness probe.
async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "now": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Live dedup fingerprints with ages.
async fn debug_seen(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"seen": state.dispatcher.debug_seen()}))
}

/// Live chains with slot presence and progress flags.
async fn debug_chain(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"chains": state.dispatcher.debug_chains()}))
}
