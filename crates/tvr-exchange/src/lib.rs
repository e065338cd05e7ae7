//! Exchange access for the webhook relay.
//!
//! Signed REST client with transient-error retry, the product metadata
//! cache, order and position surfaces, and the flatten primitives built
//! on top of them.

pub mod client;
pub mod error;
pub mod flatten;
pub mod orders;
pub mod positions;
pub mod products;

pub use client::{AuthMode, ExchangeClient, ExchangeConfig};
pub use error::{ExchangeError, ExchangeResult};
pub use flatten::{
    cancel_orders_for_symbol, close_position_for_symbol, flatten, is_flat, wait_until_flat,
    ClosedPosition, FlattenReport, FlattenRequest,
};
pub use orders::{BatchLeg, OpenOrder, CANCELABLE_STATES, RESTING_STATES};
pub use positions::{find_position, PositionRow};
pub use products::{Product, ProductCache};
