//! Product symbol normalization.
//!
//! Upstream symbols arrive decorated (`BINANCE:ARCUSDT.P`); the exchange
//! wants the bare uppercase instrument name.

/// Normalize an upstream symbol into a product symbol.
///
/// Strips any `EXCHANGE:` prefix and a trailing `.P` (perpetual) suffix,
/// then uppercases. Whitespace is trimmed.
pub fn normalize_symbol(raw: &str) -> String {
    let s = raw.trim();
    let s = match s.rsplit_once(':') {
        Some((_, rest)) => rest,
        None => s,
    };
    let s = s.strip_suffix(".P").or_else(|| s.strip_suffix(".p")).unwrap_or(s);
    s.trim().to_uppercase()
}
