//! Trade de-duplication window
//!
//! Trade events are delivered at least once, so a redelivered batch may
//! repeat trades that were already applied. The window remembers the most
//! recent trade ids and drops repeats. Trade ids are allocated from a single
//! sequence and are never reused, so the id is the natural key.

use std::collections::{HashSet, VecDeque};

use tracing::debug;
use types::ids::TradeId;

/// Default number of recent trade ids remembered
pub const DEFAULT_WINDOW: usize = 10_000;

pub struct TradeDeduplicator {
    /// Insertion order, for eviction
    order: VecDeque<TradeId>,
    seen: HashSet<TradeId>,
    window: usize,
    accepted: u64,
    dropped: u64,
}

impl Default for TradeDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl TradeDeduplicator {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            order: VecDeque::with_capacity(window),
            seen: HashSet::with_capacity(window),
            window,
            accepted: 0,
            dropped: 0,
        }
    }

    /// Record `trade_id`; returns `false` when it was seen within the window
    pub fn observe(&mut self, trade_id: TradeId) -> bool {
        if self.seen.contains(&trade_id) {
            self.dropped += 1;
            debug!(trade_id = %trade_id, "dropping duplicate trade");
            return false;
        }

        if self.order.len() >= self.window {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.order.push_back(trade_id);
        self.seen.insert(trade_id);
        self.accepted += 1;
        true
    }

    /// Forget `trade_id` so a later redelivery is applied again
    pub fn forget(&mut self, trade_id: TradeId) {
        if self.seen.remove(&trade_id) {
            self.order.retain(|id| *id != trade_id);
            self.accepted = self.accepted.saturating_sub(1);
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_duplicate_detection() {
        let mut dedup = TradeDeduplicator::default();
        assert!(dedup.observe(TradeId::new(1)));
        assert!(dedup.observe(TradeId::new(2)));
        assert!(!dedup.observe(TradeId::new(1)));

        assert_eq!(dedup.accepted(), 2);
        assert_eq!(dedup.dropped(), 1);
    }

    #[test]
    fn test_window_eviction() {
        let mut dedup = TradeDeduplicator::new(3);
        for id in 1..=4 {
            assert!(dedup.observe(TradeId::new(id)));
        }
        // 1 was evicted by 4
        assert_eq!(dedup.len(), 3);
        assert!(dedup.observe(TradeId::new(1)));
        assert!(!dedup.observe(TradeId::new(4)));
    }

    #[test]
    fn test_forget_allows_reapply() {
        let mut dedup = TradeDeduplicator::new(10);
        assert!(dedup.observe(TradeId::new(7)));
        dedup.forget(TradeId::new(7));
        assert!(dedup.observe(TradeId::new(7)));
        assert_eq!(dedup.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_window_never_exceeds_capacity(
            window in 1usize..50,
            ids in proptest::collection::vec(1u64..200, 0..500),
        ) {
            let mut dedup = TradeDeduplicator::new(window);
            for id in ids {
                dedup.observe(TradeId::new(id));
                prop_assert!(dedup.len() <= window);
                prop_assert_eq!(dedup.order.len(), dedup.seen.len());
            }
        }
    }
}
