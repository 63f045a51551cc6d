//! Fault-injecting store wrapper
//!
//! Wraps any [`Store`] and makes a configurable number of upcoming commits
//! fail with [`StoreError::Unavailable`], leaving the inner store untouched.
//! Used to exercise the atomicity and redelivery paths.

use crate::store::{Sequence, Store, StoreError, WriteBatch};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use types::prelude::*;

pub struct FlakyStore<S> {
    inner: S,
    fail_next: AtomicUsize,
    /// Commits to let through before `fail_next` starts counting down
    skip: AtomicUsize,
    attempts: AtomicUsize,
}

impl<S: Store> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_next: AtomicUsize::new(0),
            skip: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` commits
    pub fn fail_next_commits(&self, count: usize) {
        self.skip.store(0, Ordering::SeqCst);
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Let `skip` commits succeed, then fail the following `count`
    pub fn fail_commits_after(&self, skip: usize, count: usize) {
        self.skip.store(skip, Ordering::SeqCst);
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn commit_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn should_fail(&self) -> bool {
        let decrement = |n: usize| n.checked_sub(1);
        if self.skip.fetch_update(Ordering::SeqCst, Ordering::SeqCst, decrement).is_ok() {
            return false;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, decrement)
            .is_ok()
    }
}

impl<S: Store> Store for FlakyStore<S> {
    fn instrument(&self, id: InstrumentId) -> Result<Option<Instrument>, StoreError> {
        self.inner.instrument(id)
    }

    fn instrument_by_symbol(&self, symbol: &str) -> Result<Option<Instrument>, StoreError> {
        self.inner.instrument_by_symbol(symbol)
    }

    fn active_instruments(&self) -> Result<Vec<Instrument>, StoreError> {
        self.inner.active_instruments()
    }

    fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        self.inner.order(id)
    }

    fn open_orders(&self, instrument_id: InstrumentId) -> Result<Vec<Order>, StoreError> {
        self.inner.open_orders(instrument_id)
    }

    fn trades_for_order(&self, order_id: OrderId) -> Result<Vec<Trade>, StoreError> {
        self.inner.trades_for_order(order_id)
    }

    fn market_data(
        &self,
        instrument_id: InstrumentId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MarketDataPoint>, StoreError> {
        self.inner.market_data(instrument_id, from, to)
    }

    fn latest_market_data(
        &self,
        instrument_id: InstrumentId,
    ) -> Result<Option<MarketDataPoint>, StoreError> {
        self.inner.latest_market_data(instrument_id)
    }

    fn feed_trade(&self, trade_id: u64) -> Result<Option<FeedTrade>, StoreError> {
        self.inner.feed_trade(trade_id)
    }

    fn allocate(&self, sequence: Sequence) -> Result<u64, StoreError> {
        self.inner.allocate(sequence)
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.should_fail() {
            return Err(StoreError::Unavailable("injected commit failure".into()));
        }
        self.inner.commit(batch)
    }
}
