//! Core domain types for the webhook relay.
//!
//! This crate provides the fundamental types used throughout the relay:
//! - `SignalMessage`: the parsed webhook envelope plus per-step payload
//! - `Step`: the CANCAL → ENTER → BATCH_TPS protocol position
//! - `OrderSide`, `Scope`: trading enums
//! - identifier minting (chain keys, dedup fingerprints, client order ids)

pub mod error;
pub mod ids;
pub mod order;
pub mod signal;
pub mod symbol;

pub use error::{CoreError, Result};
pub use ids::{fingerprint, sig_key, tp_client_order_id, MAX_CLIENT_ORDER_ID_LEN};
pub use order::{OrderSide, Scope};
pub use signal::{
    BatchPayload, Budget, CancalPayload, Ccy, EnterPayload, ParsedSignal, SignalMessage,
    SignalPayload, Step, TpLeg, parse_signal,
};
pub use symbol::normalize_symbol;
