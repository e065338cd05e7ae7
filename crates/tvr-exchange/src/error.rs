//! Exchange error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Transport error for {method} {url}: {source}")]
    Transport {
        method: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Exchange rejected {method} {url} (status {status}): {body}")]
    Api {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("Malformed response from {path}: {detail}")]
    Malformed { path: String, detail: String },

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("No usable price for {0}")]
    NoPrice(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;
