//! Identifier minting: chain keys, dedup fingerprints, client order ids.

use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Maximum client order id length the exchange accepts.
pub const MAX_CLIENT_ORDER_ID_LEN: usize = 32;

/// Chain key for one logical signal: digest of `sig_id || UPPER(psym)`.
pub fn sig_key(sig_id: &str, product_symbol: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sig_id.as_bytes());
    hasher.update(product_symbol.to_uppercase().as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

/// Dedup fingerprint for one delivery: digest over
/// `sig_id | UPPER(psym) | seq | hash(orders)`.
///
/// `orders_json` is the serialized `orders` array when present, so two
/// BATCH_TPS deliveries with different legs never collide.
pub fn fingerprint(sig_id: &str, product_symbol: &str, seq: u8, orders_json: Option<&str>) -> String {
    let orders_digest = match orders_json {
        Some(s) => hex::encode(Sha256::digest(s.as_bytes())),
        None => String::new(),
    };
    let input = format!(
        "{sig_id}|{}|{seq}|{orders_digest}",
        product_symbol.to_uppercase()
    );
    let digest = hex::encode(Sha256::digest(input.as_bytes()));
    digest[..24].to_string()
}

/// Mint a client order id for a take-profit leg, at most 32 chars.
///
/// Layout: `T<idx><sanitized-symbol-prefix-6>_` followed by as much of the
/// SHA-1 hex of `sig_id|psym|TP|idx|now_ms` as fits. The digest keeps ids
/// unique across redeliveries of the same leg.
pub fn tp_client_order_id(sig_id: &str, product_symbol: &str, leg_idx: usize, now_ms: u64) -> String {
    let sym: String = product_symbol
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(6)
        .collect();
    let prefix = format!("T{leg_idx}{sym}_");

    let tuple = format!("{sig_id}|{product_symbol}|TP|{leg_idx}|{now_ms}");
    let digest = hex::encode(Sha1::digest(tuple.as_bytes()));

    let room = MAX_CLIENT_ORDER_ID_LEN.saturating_sub(prefix.len());
    format!("{prefix}{}", &digest[..room.min(digest.len())])
}
