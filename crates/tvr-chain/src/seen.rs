//! Delivery idempotency: the seen-set.
//!
//! Webhook providers redeliver; a fingerprint admitted once within the TTL
//! must never cause a second exchange-mutating call.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// How long a fingerprint suppresses replays.
pub const SEEN_TTL: Duration = Duration::from_secs(60);

/// Soft cap on tracked fingerprints.
const SEEN_CAP: usize = 300;

/// Eviction target once the cap is hit.
const SEEN_EVICT_TO: usize = 200;

/// Snapshot row for the debug endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SeenEntry {
    pub fingerprint: String,
    pub age_ms: u64,
}

/// Fingerprint set with TTL and FIFO-ish soft-cap eviction.
#[derive(Debug, Default)]
pub struct SeenSet {
    entries: HashMap<String, Instant>,
    order: VecDeque<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a fingerprint. Returns `false` when it was already seen
    /// within the TTL (the delivery is a replay).
    pub fn admit(&mut self, fingerprint: &str) -> bool {
        self.purge();

        if let Some(seen_at) = self.entries.get(fingerprint) {
            if seen_at.elapsed() < SEEN_TTL {
                return false;
            }
        }

        if self.entries.len() >= SEEN_CAP {
            while self.entries.len() > SEEN_EVICT_TO {
                match self.order.pop_front() {
                    Some(old) => {
                        self.entries.remove(&old);
                    }
                    None => break,
                }
            }
        }

        self.entries.insert(fingerprint.to_string(), Instant::now());
        self.order.push_back(fingerprint.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<SeenEntry> {
        self.entries
            .iter()
            .map(|(fp, at)| SeenEntry {
                fingerprint: fp.clone(),
                age_ms: at.elapsed().as_millis() as u64,
            })
            .collect()
    }

    fn purge(&mut self) {
        let before = self.entries.len();
        self.entries.retain(|_, at| at.elapsed() < SEEN_TTL);
        if self.entries.len() != before {
            self.order.retain(|fp| self.entries.contains_key(fp));
        }
    }
}
