//! Typed dispatch outcomes and per-step progress reports.

use crate::state::{ChainFlags, SlotPresence};
use serde::Serialize;
use tvr_core::{OrderSide, Step};

/// What one executed step did, serialized verbatim into the HTTP response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepReport {
    Cancel {
        scope: String,
        canceled: usize,
        canceled_all: bool,
        closed: bool,
        closed_all: bool,
        synthesized: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        skipped: Option<String>,
    },
    Enter {
        side: OrderSide,
        size: i64,
        preflight: bool,
    },
    Batch {
        side: OrderSide,
        product_id: i64,
        sizes: Vec<i64>,
        position_lots: i64,
    },
}

/// Terminal status of a dispatch that ran at least one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    /// All three flags are set.
    Done,
    /// Some progress was made, more legs outstanding.
    Progressed,
}

/// Summary of a completed dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchSummary {
    pub status: DispatchStatus,
    pub have: SlotPresence,
    pub did: ChainFlags,
    pub progressed: Vec<StepReport>,
}

/// Outcome of one admitted delivery.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Replay within the seen-set TTL; nothing executed.
    Dedup,
    /// The chain is missing the message for `waiting_for`; any steps that
    /// did run are in `progressed`.
    Queued {
        waiting_for: Step,
        have: SlotPresence,
        did: ChainFlags,
        progressed: Vec<StepReport>,
    },
    /// Steps ran to a terminal or progressed state.
    Summary(DispatchSummary),
}
