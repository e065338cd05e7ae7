//! Flatten primitives: cancel open orders and close positions, per-symbol
//! or globally, plus the wait-until-flat probe.

use crate::client::ExchangeClient;
use crate::error::ExchangeResult;
use crate::orders::{CANCELABLE_STATES, RESTING_STATES};
use crate::positions::find_position;
use crate::products::ProductCache;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tvr_core::{OrderSide, Scope};
use tvr_sizing::{infer_position_units, PositionUnits};

/// What to flatten and how.
#[derive(Debug, Clone)]
pub struct FlattenRequest {
    pub scope: Scope,
    /// Ignored when scope is ALL.
    pub symbol: String,
    pub cancel_orders: bool,
    pub close_position: bool,
    /// Fall back to cancel-all when a per-order cancel fails.
    pub cancel_fallback_all: bool,
}

/// A position closed by a flatten pass.
#[derive(Debug, Clone, Serialize)]
pub struct ClosedPosition {
    pub side: OrderSide,
    pub lots: i64,
    pub units: PositionUnits,
}

/// What a flatten pass actually did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlattenReport {
    pub scope: String,
    pub canceled: usize,
    pub canceled_all: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed: Option<ClosedPosition>,
    pub closed_all: bool,
}

/// Execute a flatten request: cancel orders and/or close positions in the
/// requested scope.
pub async fn flatten(
    client: &ExchangeClient,
    products: &ProductCache,
    request: &FlattenRequest,
) -> ExchangeResult<FlattenReport> {
    let mut report = FlattenReport {
        scope: request.scope.to_string(),
        ..Default::default()
    };

    if request.scope.is_all() {
        if request.cancel_orders {
            client.cancel_all_orders().await?;
            report.canceled_all = true;
        }
        if request.close_position {
            client.close_all_positions().await?;
            report.closed_all = true;
        }
        info!(canceled_all = report.canceled_all, closed_all = report.closed_all, "global flatten");
        return Ok(report);
    }

    if request.cancel_orders {
        let (canceled, fell_back) =
            cancel_orders_for_symbol(client, products, &request.symbol, request.cancel_fallback_all)
                .await?;
        report.canceled = canceled;
        report.canceled_all = fell_back;
    }
    if request.close_position {
        report.closed = close_position_for_symbol(client, products, &request.symbol).await?;
    }

    info!(
        symbol = %request.symbol,
        canceled = report.canceled,
        closed = report.closed.is_some(),
        "symbol flatten"
    );
    Ok(report)
}

/// Cancel all open orders on one product.
///
/// Returns the number canceled and whether the cancel-all fallback fired.
pub async fn cancel_orders_for_symbol(
    client: &ExchangeClient,
    products: &ProductCache,
    symbol: &str,
    fallback_all: bool,
) -> ExchangeResult<(usize, bool)> {
    let orders = client.list_open_orders(CANCELABLE_STATES).await?;
    let mine: Vec<_> = orders.into_iter().filter(|o| o.matches_symbol(symbol)).collect();

    let mut canceled = 0usize;
    let mut failed = false;
    for order in &mine {
        let product_id = match order.product_id {
            Some(id) => id,
            None => products.product_id(symbol).await?,
        };
        match client.cancel_order(order, product_id).await {
            Ok(()) => canceled += 1,
            Err(e) => {
                warn!(order_id = order.id, symbol, error = %e, "cancel failed");
                failed = true;
            }
        }
    }

    if failed && fallback_all {
        warn!(symbol, "per-order cancel failed, falling back to cancel-all");
        client.cancel_all_orders().await?;
        return Ok((canceled, true));
    }
    Ok((canceled, false))
}

/// Close the position on one product with a reduce-only market order.
///
/// No-op (returns `None`) when no open position exists.
pub async fn close_position_for_symbol(
    client: &ExchangeClient,
    products: &ProductCache,
    symbol: &str,
) -> ExchangeResult<Option<ClosedPosition>> {
    let positions = client.list_positions().await?;
    let Some(row) = find_position(&positions, symbol).filter(|r| r.is_open()) else {
        return Ok(None);
    };

    let lot_mult = products.lot_mult(symbol).await?;
    let inferred = infer_position_units(row.size, lot_mult, row.notional, row.reference_price());
    let side = OrderSide::closing(if row.size.is_sign_negative() { -1 } else { 1 });

    client
        .place_market_order(symbol, side, inferred.lots, true)
        .await?;
    info!(symbol, side = %side, lots = inferred.lots, units = %inferred.units, "position closed");

    Ok(Some(ClosedPosition {
        side,
        lots: inferred.lots,
        units: inferred.units,
    }))
}

/// One flatness probe: no resting orders and no open position (optionally
/// scoped to one symbol).
pub async fn is_flat(client: &ExchangeClient, symbol: Option<&str>) -> ExchangeResult<bool> {
    let orders = client.list_open_orders(RESTING_STATES).await?;
    let resting = match symbol {
        Some(sym) => orders.iter().any(|o| o.matches_symbol(sym)),
        None => !orders.is_empty(),
    };
    if resting {
        return Ok(false);
    }

    let positions = client.list_positions().await?;
    let open = match symbol {
        Some(sym) => positions.iter().any(|p| p.matches_symbol(sym) && p.is_open()),
        None => positions.iter().any(|p| p.is_open()),
    };
    Ok(!open)
}

/// Poll until flat or until the timeout elapses. Transient probe errors
/// are swallowed; only the final verdict is observable.
pub async fn wait_until_flat(
    client: &ExchangeClient,
    symbol: Option<&str>,
    timeout: Duration,
    poll: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match is_flat(client, symbol).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => warn!(error = %e, "flat probe failed, retrying"),
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}
