//! Order sizing for the webhook relay.
//!
//! Pure arithmetic over `rust_decimal`:
//! - margin budget → lot count conversion
//! - lots-vs-coins inference for raw position sizes
//! - take-profit size normalization and batch clamping

pub mod budget;
pub mod error;
pub mod tp;
pub mod units;

pub use budget::{lots_from_amount, BudgetInputs};
pub use error::{SizingError, SizingResult};
pub use tp::{clamp_legs_to_position, normalize_tp_size, LastEntryHint};
pub use units::{infer_position_units, InferredPosition, PositionUnits};
