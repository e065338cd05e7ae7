//! Signed HTTP client for the exchange REST API.
//!
//! Every request is signed per attempt (the signature binds the timestamp)
//! and transient failures are retried with a linear backoff.

use crate::error::{ExchangeError, ExchangeResult};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum attempts per logical call.
const MAX_ATTEMPTS: u32 = 3;

/// Linear backoff unit: attempt N sleeps N * this.
const BACKOFF_STEP: Duration = Duration::from_millis(300);

/// HTTP statuses (and embedded error codes) considered transient.
const RETRYABLE_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// HMAC-SHA256 signature over `METHOD‖ts‖path‖query‖body`.
    Hmac,
    /// Api-key header only (paper endpoints).
    KeyOnly,
}

/// Exchange client configuration.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub auth: AuthMode,
    pub header_api_key: String,
    pub header_signature: String,
    pub header_timestamp: String,
}

impl ExchangeConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            auth: AuthMode::Hmac,
            header_api_key: "api-key".to_string(),
            header_signature: "signature".to_string(),
            header_timestamp: "timestamp".to_string(),
        }
    }
}

/// Signed REST client.
pub struct ExchangeClient {
    http: Client,
    config: ExchangeConfig,
}

impl ExchangeClient {
    pub fn new(config: ExchangeConfig) -> ExchangeResult<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ExchangeError::HttpClient(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    /// Issue one authenticated call, retrying transient failures.
    ///
    /// `path` must start with `/`; `query` is the raw query string without
    /// the leading `?`. Returns the parsed JSON body of the first
    /// non-transient response.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        body: Option<&Value>,
    ) -> ExchangeResult<Value> {
        let url = match query {
            Some(q) if !q.is_empty() => format!("{}{}?{}", self.config.base_url, path, q),
            _ => format!("{}{}", self.config.base_url, path),
        };
        let body_str = match body {
            Some(b) => serde_json::to_string(b)?,
            None => String::new(),
        };

        let mut attempt = 1u32;
        loop {
            let result = self
                .attempt(&method, path, query, &url, &body_str)
                .await;

            match result {
                Ok(Attempt::Done(json)) => return Ok(json),
                Ok(Attempt::Transient { status, .. }) if attempt < MAX_ATTEMPTS => {
                    warn!(
                        method = %method, url = %url, status, attempt,
                        "transient exchange error, retrying"
                    );
                    tokio::time::sleep(BACKOFF_STEP * attempt).await;
                    attempt += 1;
                }
                Ok(Attempt::Transient { status, body }) => {
                    return Err(ExchangeError::Api {
                        method: method.to_string(),
                        url,
                        status,
                        body,
                    })
                }
                Err(e) if attempt < MAX_ATTEMPTS && is_transport_transient(&e) => {
                    warn!(method = %method, url = %url, attempt, error = %e, "transport error, retrying");
                    tokio::time::sleep(BACKOFF_STEP * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(
        &self,
        method: &Method,
        path: &str,
        query: Option<&str>,
        url: &str,
        body_str: &str,
    ) -> ExchangeResult<Attempt> {
        // Whole seconds, fresh per attempt: the signature binds it.
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .to_string();

        let mut req = self
            .http
            .request(method.clone(), url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header(&self.config.header_api_key, &self.config.api_key);

        if self.config.auth == AuthMode::Hmac {
            let signature = self.sign(method, &timestamp, path, query, body_str);
            req = req
                .header(&self.config.header_signature, signature)
                .header(&self.config.header_timestamp, &timestamp);
        }

        if !body_str.is_empty() {
            req = req.body(body_str.to_string());
        }

        let response = req.send().await.map_err(|e| ExchangeError::Transport {
            method: method.to_string(),
            url: url.to_string(),
            source: e,
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ExchangeError::Transport {
            method: method.to_string(),
            url: url.to_string(),
            source: e,
        })?;

        let json: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        if is_transient(status, &json) {
            return Ok(Attempt::Transient {
                status: status.as_u16(),
                body: text,
            });
        }

        if !status.is_success() || json.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(ExchangeError::Api {
                method: method.to_string(),
                url: url.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }

        debug!(method = %method, path, status = status.as_u16(), "exchange call ok");
        Ok(Attempt::Done(json))
    }

    /// Canonical string: `METHOD ‖ ts ‖ path ‖ ?query ‖ body`, HMAC-SHA256 hex.
    fn sign(
        &self,
        method: &Method,
        timestamp: &str,
        path: &str,
        query: Option<&str>,
        body: &str,
    ) -> String {
        let query_part = match query {
            Some(q) if !q.is_empty() => format!("?{q}"),
            _ => String::new(),
        };
        let canonical = format!("{}{timestamp}{path}{query_part}{body}", method.as_str());

        let mut mac = HmacSha256::new_from_slice(self.config.api_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(canonical.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

enum Attempt {
    Done(Value),
    Transient { status: u16, body: String },
}

fn is_transient(status: StatusCode, json: &Value) -> bool {
    if RETRYABLE_CODES.contains(&status.as_u16()) {
        return true;
    }
    if json.get("success").and_then(Value::as_bool) == Some(false) {
        if let Some(code) = error_code(json) {
            return RETRYABLE_CODES.contains(&code);
        }
    }
    false
}

/// Error code from `{error:{code}}` or a top-level `code`, numeric or string.
fn error_code(json: &Value) -> Option<u16> {
    let code = json
        .get("error")
        .and_then(|e| e.get("code"))
        .or_else(|| json.get("code"))?;
    match code {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.parse::<u16>().ok(),
        _ => None,
    }
}

fn is_transport_transient(err: &ExchangeError) -> bool {
    matches!(err, ExchangeError::Transport { .. })
}
