//! Observer-side projection of a room
//!
//! Every observer keeps its own stats tally, fed by change events. Events can
//! arrive more than once and codes can arrive out of order, so each event goes
//! through two filters before it touches the counters:
//!
//! 1. `EventDeduper` drops an event whose (code id, status) key was already seen.
//! 2. `StatsTally` ignores a row older than the newest one it holds for that code.
//!    Age is the store's per-row version; timestamps come from whichever node
//!    wrote the row and are not used for ordering.
//!
//! Counters clamp at zero and are periodically replaced by a fresh scan.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::types::*;

/// Bounded seen-set of event keys
#[derive(Debug, Clone)]
pub struct EventDeduper {
    seen: HashSet<EventKey>,
    order: VecDeque<EventKey>,
    capacity: usize,
}

impl EventDeduper {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record the key. Returns false if it was already seen.
    ///
    /// Seeing a code in a new status forgets its older keys, so a code that
    /// goes failed -> pending -> testing -> failed counts its second failure.
    pub fn observe(&mut self, key: &EventKey) -> bool {
        if self.seen.contains(key) {
            return false;
        }

        let stale: Vec<EventKey> = CodeStatus::ALL
            .iter()
            .filter(|s| **s != key.status)
            .map(|s| EventKey {
                code_id: key.code_id.clone(),
                status: *s,
            })
            .filter(|k| self.seen.contains(k))
            .collect();
        for k in &stale {
            self.seen.remove(k);
        }
        if !stale.is_empty() {
            self.order.retain(|k| !stale.contains(k));
        }

        self.seen.insert(key.clone());
        self.order.push_back(key.clone());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct SeenRow {
    status: CodeStatus,
    version: u64,
}

/// Incrementally maintained status counts
#[derive(Debug, Clone, Default)]
pub struct StatsTally {
    stats: RoomStats,
    latest: HashMap<CodeId, SeenRow>,
}

impl StatsTally {
    pub fn new(initial: RoomStats) -> Self {
        Self {
            stats: initial,
            latest: HashMap::new(),
        }
    }

    /// Seed from a full scan, remembering each row so that events already
    /// reflected in the scan are ignored when they arrive
    pub fn from_snapshot(codes: &[Code]) -> Self {
        let mut tally = Self::default();
        tally.merge_snapshot(codes);
        tally
    }

    pub fn stats(&self) -> RoomStats {
        self.stats
    }

    /// True if the tally already holds this row or a newer one for the code
    pub fn is_stale(&self, event: &CodeEvent) -> bool {
        let code = &event.code;
        self.latest
            .get(&code.id)
            .is_some_and(|seen| code.version <= seen.version)
    }

    /// Apply one event. Returns true if the counters changed.
    pub fn apply(&mut self, event: &CodeEvent) -> bool {
        let code = &event.code;
        let prior = match self.latest.get(&code.id) {
            Some(seen) => {
                if code.version <= seen.version {
                    return false;
                }
                seen.status
            }
            None => event.previous_status,
        };

        self.latest.insert(
            code.id.clone(),
            SeenRow {
                status: code.status,
                version: code.version,
            },
        );

        if prior == code.status {
            return false;
        }
        self.stats.decrement(prior);
        self.stats.increment(code.status);
        true
    }

    /// Replace the counters with ground truth counts
    pub fn reconcile(&mut self, truth: RoomStats) {
        if truth != self.stats {
            tracing::debug!(tally = ?self.stats, truth = ?truth, "Stats tally drifted, reconciling");
        }
        self.stats = truth;
    }

    /// Reconcile against full rows: keep whichever of the scanned row and the
    /// last seen event is newer, then recount
    pub fn merge_snapshot(&mut self, codes: &[Code]) {
        for code in codes {
            let newer = match self.latest.get(&code.id) {
                Some(seen) => code.version > seen.version,
                None => true,
            };
            if newer {
                self.latest.insert(
                    code.id.clone(),
                    SeenRow {
                        status: code.status,
                        version: code.version,
                    },
                );
            }
        }
        self.reconcile(RoomStats::from_statuses(self.latest.values().map(|r| r.status)));
    }
}

/// Dedup plus tally: everything one observer needs to follow a room
#[derive(Debug, Clone)]
pub struct RoomView {
    deduper: EventDeduper,
    tally: StatsTally,
}

impl RoomView {
    pub fn new(initial: RoomStats, dedup_capacity: usize) -> Self {
        Self {
            deduper: EventDeduper::new(dedup_capacity),
            tally: StatsTally::new(initial),
        }
    }

    /// Returns false if the event was a duplicate and should not be forwarded.
    ///
    /// Rows older than the newest one seen for the code are dropped before
    /// they reach the deduper, so a replayed `testing` cannot evict the key
    /// of the `failed` that followed it.
    pub fn observe(&mut self, event: &CodeEvent) -> bool {
        if self.tally.is_stale(event) {
            return false;
        }
        if !self.deduper.observe(&event.key) {
            return false;
        }
        self.tally.apply(event);
        true
    }

    pub fn from_snapshot(codes: &[Code], dedup_capacity: usize) -> Self {
        Self {
            deduper: EventDeduper::new(dedup_capacity),
            tally: StatsTally::from_snapshot(codes),
        }
    }

    pub fn stats(&self) -> RoomStats {
        self.tally.stats()
    }

    pub fn reconcile(&mut self, truth: RoomStats) {
        self.tally.reconcile(truth);
    }

    pub fn merge_snapshot(&mut self, codes: &[Code]) {
        self.tally.merge_snapshot(codes);
    }
}
