//! Bid (buy-side) order book
//!
//! Maintains buy orders best first: resting market orders (treated as an
//! infinitely high bid), then limit levels by price descending.
//! Uses BTreeMap for deterministic iteration order.

use std::collections::BTreeMap;
use types::numeric::Price;
use types::order::{Order, Side};

use super::price_level::PriceLevel;
use super::{BookKey, Slot};

/// Bid (buy) side order book
#[derive(Debug, Clone, Default)]
pub struct BidBook {
    /// Resting market buy orders
    market: PriceLevel,
    /// Price levels; iterated in reverse for highest price first
    levels: BTreeMap<Price, PriceLevel>,
}

impl BidBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a buy order at its slot and time priority
    pub fn insert(&mut self, order: Order) {
        debug_assert_eq!(order.side, Side::Buy);
        match BookKey::of(&order).slot {
            Slot::Market => self.market.insert(order),
            Slot::Limit(price) => self.levels.entry(price).or_default().insert(order),
        }
    }

    /// Remove an order from the bid book
    pub fn remove(&mut self, key: &BookKey) -> Option<Order> {
        match key.slot {
            Slot::Market => self.market.remove(&key.priority),
            Slot::Limit(price) => {
                let level = self.levels.get_mut(&price)?;
                let removed = level.remove(&key.priority);
                // Remove empty price levels to keep book clean
                if level.is_empty() {
                    self.levels.remove(&price);
                }
                removed
            }
        }
    }

    pub fn get(&self, key: &BookKey) -> Option<&Order> {
        match key.slot {
            Slot::Market => self.market.get(&key.priority),
            Slot::Limit(price) => self.levels.get(&price)?.get(&key.priority),
        }
    }

    /// Replace a resting order with its updated copy; a filled order leaves
    pub fn update(&mut self, order: Order) -> bool {
        match BookKey::of(&order).slot {
            Slot::Market => self.market.update(order),
            Slot::Limit(price) => {
                let Some(level) = self.levels.get_mut(&price) else {
                    return false;
                };
                let updated = level.update(order);
                if level.is_empty() {
                    self.levels.remove(&price);
                }
                updated
            }
        }
    }

    /// Bids an incoming sell may match, best first.
    ///
    /// Market bids come first, then price levels descending, each in time
    /// priority. With `limit` set, levels priced below it are left out.
    pub fn candidates(&self, limit: Option<Price>) -> Vec<BookKey> {
        let market = self.market.priorities().map(|priority| BookKey {
            slot: Slot::Market,
            priority,
        });
        let priced = self
            .levels
            .iter()
            .rev()
            .take_while(|(price, _)| limit.map_or(true, |limit| **price >= limit))
            .flat_map(|(price, level)| {
                level.priorities().map(move |priority| BookKey {
                    slot: Slot::Limit(*price),
                    priority,
                })
            });
        market.chain(priced).collect()
    }

    /// Get depth snapshot (top N price levels, highest first)
    pub fn depth_snapshot(&self, depth: usize) -> Vec<(Price, u64)> {
        self.levels
            .iter()
            .rev()
            .take(depth)
            .map(|(price, level)| (*price, level.total_quantity()))
            .collect()
    }

    /// Remaining quantity of resting market buys
    pub fn market_quantity(&self) -> u64 {
        self.market.total_quantity()
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.market
            .orders()
            .chain(self.levels.values().rev().flat_map(|level| level.orders()))
    }

    pub fn is_empty(&self) -> bool {
        self.market.is_empty() && self.levels.is_empty()
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn order_count(&self) -> usize {
        self.market.order_count() + self.levels.values().map(PriceLevel::order_count).sum::<usize>()
    }
}
