//! Signal chain records.
//!
//! One record per `(sig_id, product_symbol)` buffers the three protocol
//! messages and tracks monotone progress flags. Records are evicted by
//! TTL on access; flags are never cleared.

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tvr_core::{SignalMessage, Step};

/// Idle TTL after which a chain record is evicted.
pub const CHAIN_TTL: Duration = Duration::from_secs(120);

/// Progress flags for a chain. Monotone: set-only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChainFlags {
    pub cancel: bool,
    pub enter_prep: bool,
    pub enter: bool,
    pub batch: bool,
}

impl ChainFlags {
    pub fn all_done(&self) -> bool {
        self.cancel && self.enter && self.batch
    }
}

/// Which message slots hold a buffered message.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SlotPresence {
    pub cancel: bool,
    pub enter: bool,
    pub batch: bool,
}

/// One chain record.
#[derive(Debug, Clone)]
pub struct ChainRecord {
    pub created_at: Instant,
    pub last_touch: Instant,
    pub cancel_msg: Option<SignalMessage>,
    pub enter_msg: Option<SignalMessage>,
    pub batch_msg: Option<SignalMessage>,
    pub flags: ChainFlags,
}

impl ChainRecord {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            created_at: now,
            last_touch: now,
            cancel_msg: None,
            enter_msg: None,
            batch_msg: None,
            flags: ChainFlags::default(),
        }
    }

    /// Buffer a message into its slot (last writer wins) and touch.
    pub fn merge(&mut self, msg: SignalMessage) {
        self.last_touch = Instant::now();
        match msg.step() {
            Step::Cancal => self.cancel_msg = Some(msg),
            Step::Enter => self.enter_msg = Some(msg),
            Step::BatchTps => self.batch_msg = Some(msg),
        }
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn have(&self) -> SlotPresence {
        SlotPresence {
            cancel: self.cancel_msg.is_some(),
            enter: self.enter_msg.is_some(),
            batch: self.batch_msg.is_some(),
        }
    }
}

/// Snapshot row for the debug endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ChainSnapshot {
    pub sig_key: String,
    pub age_ms: u64,
    pub idle_ms: u64,
    pub have: SlotPresence,
    pub did: ChainFlags,
}

/// All live chains, keyed by sig key.
#[derive(Debug, Default)]
pub struct ChainMap {
    chains: HashMap<String, ChainRecord>,
}

impl ChainMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Age of an existing chain, without evicting or touching anything.
    ///
    /// Callers enforcing the signal window must consult this before
    /// `upsert`: eviction inside `upsert` would otherwise replace an
    /// over-window record with a fresh one and reset its age to zero.
    pub fn age_of(&self, sig_key: &str) -> Option<Duration> {
        self.chains.get(sig_key).map(ChainRecord::age)
    }

    /// Merge a message into its chain, creating the record if needed.
    /// Idle records past the TTL are dropped first, so a long-dormant key
    /// starts a fresh chain.
    pub fn upsert(&mut self, sig_key: &str, msg: SignalMessage) -> &mut ChainRecord {
        self.evict();
        let record = self
            .chains
            .entry(sig_key.to_string())
            .or_insert_with(ChainRecord::new);
        record.merge(msg);
        record
    }

    pub fn get_mut(&mut self, sig_key: &str) -> Option<&mut ChainRecord> {
        self.chains.get_mut(sig_key)
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn snapshot(&self) -> Vec<ChainSnapshot> {
        self.chains
            .iter()
            .map(|(key, rec)| ChainSnapshot {
                sig_key: key.clone(),
                age_ms: rec.age().as_millis() as u64,
                idle_ms: rec.last_touch.elapsed().as_millis() as u64,
                have: rec.have(),
                did: rec.flags,
            })
            .collect()
    }

    fn evict(&mut self) {
        self.chains
            .retain(|_, rec| rec.last_touch.elapsed() <= CHAIN_TTL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tvr_core::{parse_signal, ParsedSignal};

    fn msg(action: &str, seq: u8) -> SignalMessage {
        let mut body = json!({
            "action": action, "sig_id": "S1", "seq": seq, "symbol": "ARCUSD",
            "side": "buy"
        });
        if action == "BATCH_TPS" {
            body["orders"] = json!([{"limit_price": "1", "size": 1}]);
        }
        match parse_signal(&body, true).unwrap() {
            ParsedSignal::Actionable(m) => *m,
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_upsert_fills_slots() {
        let mut chains = ChainMap::new();
        let key = msg("CANCAL", 0).sig_key();

        chains.upsert(&key, msg("CANCAL", 0));
        chains.upsert(&key, msg("ENTER", 1));

        let rec = chains.get_mut(&key).unwrap();
        let have = rec.have();
        assert!(have.cancel && have.enter && !have.batch);
        assert_eq!(chains.len(), 1);
    }

    #[test]
    fn test_last_writer_wins_per_slot() {
        let mut chains = ChainMap::new();
        let key = msg("ENTER", 1).sig_key();

        chains.upsert(&key, msg("ENTER", 1));
        let first_touch = chains.get_mut(&key).unwrap().last_touch;
        chains.upsert(&key, msg("ENTER", 1));

        let rec = chains.get_mut(&key).unwrap();
        assert!(rec.enter_msg.is_some());
        assert!(rec.last_touch >= first_touch);
    }

    #[test]
    fn test_age_of_reads_without_creating() {
        let mut chains = ChainMap::new();
        let key = msg("CANCAL", 0).sig_key();

        assert!(chains.age_of(&key).is_none());
        assert!(chains.is_empty());

        chains.upsert(&key, msg("CANCAL", 0));
        let age = chains.age_of(&key).expect("record exists");
        assert!(age < Duration::from_secs(1));

        // A second lookup sees the same record, not a fresh zero-age one.
        chains.upsert(&key, msg("ENTER", 1));
        assert!(chains.age_of(&key).expect("still present") >= age);
        assert_eq!(chains.len(), 1);
    }

    #[test]
    fn test_flags_default_clear_and_done() {
        let flags = ChainFlags::default();
        assert!(!flags.all_done());

        let done = ChainFlags { cancel: true, enter_prep: true, enter: true, batch: true };
        assert!(done.all_done());
    }
}
