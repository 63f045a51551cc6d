//! Ask (sell-side) order book
//!
//! Maintains sell orders best first: resting market orders (treated as a
//! zero-priced ask), then limit levels by price ascending.
//! Uses BTreeMap for deterministic iteration order.

use std::collections::BTreeMap;
use types::numeric::Price;
use types::order::{Order, Side};

use super::price_level::PriceLevel;
use super::{BookKey, Slot};

/// Ask (sell) side order book
#[derive(Debug, Clone, Default)]
pub struct AskBook {
    /// Resting market sell orders
    market: PriceLevel,
    /// Price levels sorted ascending (lowest price first)
    levels: BTreeMap<Price, PriceLevel>,
}

impl AskBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a sell order at its slot and time priority
    pub fn insert(&mut self, order: Order) {
        debug_assert_eq!(order.side, Side::Sell);
        match BookKey::of(&order).slot {
            Slot::Market => self.market.insert(order),
            Slot::Limit(price) => self.levels.entry(price).or_default().insert(order),
        }
    }

    /// Remove an order from the ask book
    pub fn remove(&mut self, key: &BookKey) -> Option<Order> {
        match key.slot {
            Slot::Market => self.market.remove(&key.priority),
            Slot::Limit(price) => {
                let level = self.levels.get_mut(&price)?;
                let removed = level.remove(&key.priority);
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

    /// Asks an incoming buy may match, best first.
    ///
    /// Market asks come first, then price levels ascending, each in time
    /// priority. With `limit` set, levels priced above it are left out.
    pub fn candidates(&self, limit: Option<Price>) -> Vec<BookKey> {
        let market = self.market.priorities().map(|priority| BookKey {
            slot: Slot::Market,
            priority,
        });
        let priced = self
            .levels
            .iter()
            .take_while(|(price, _)| limit.map_or(true, |limit| **price <= limit))
            .flat_map(|(price, level)| {
                level.priorities().map(move |priority| BookKey {
                    slot: Slot::Limit(*price),
                    priority,
                })
            });
        market.chain(priced).collect()
    }

    /// Get depth snapshot (top N price levels, lowest first)
    pub fn depth_snapshot(&self, depth: usize) -> Vec<(Price, u64)> {
        self.levels
            .iter()
            .take(depth)
            .map(|(price, level)| (*price, level.total_quantity()))
            .collect()
    }

    /// Remaining quantity of resting market sells
    pub fn market_quantity(&self) -> u64 {
        self.market.total_quantity()
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.market
            .orders()
            .chain(self.levels.values().flat_map(|level| level.orders()))
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use types::prelude::*;

    fn ask(id: u64, kind: OrderKind, cents: i64, quantity: u64, secs: i64) -> Order {
        Order::new_pending(
            OrderId::new(id),
            "seller",
            InstrumentId::new(1),
            kind,
            Side::Sell,
            quantity,
            Price::from_cents(cents),
            Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_ask_book_depth_starts_at_lowest_ask() {
        let mut book = AskBook::new();
        book.insert(ask(1, OrderKind::Limit, 50_000, 1, 0));
        book.insert(ask(2, OrderKind::Limit, 49_000, 2, 1));
        book.insert(ask(3, OrderKind::Limit, 51_000, 3, 2));

        assert_eq!(book.depth_snapshot(1), vec![(Price::from_cents(49_000), 2)]);
    }

    #[test]
    fn test_candidates_market_first_then_ascending_then_time() {
        let mut book = AskBook::new();
        book.insert(ask(1, OrderKind::Limit, 15_100, 1, 0));
        book.insert(ask(2, OrderKind::Limit, 15_000, 1, 5));
        book.insert(ask(3, OrderKind::Limit, 15_000, 1, 1));
        book.insert(ask(4, OrderKind::Market, 0, 1, 9));

        let ids: Vec<u64> = book
            .candidates(None)
            .iter()
            .map(|key| key.priority.order_id.value())
            .collect();
        assert_eq!(ids, vec![4, 3, 2, 1]);
    }

    #[test]
    fn test_candidates_respect_limit() {
        let mut book = AskBook::new();
        book.insert(ask(1, OrderKind::Limit, 9_500, 5, 0));
        book.insert(ask(2, OrderKind::Market, 0, 5, 1));

        // the market ask is always a candidate
        let keys = book.candidates(Some(Price::from_cents(9_000)));
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].slot, Slot::Market);
    }

    #[test]
    fn test_ask_book_remove_and_get() {
        let mut book = AskBook::new();
        let order = ask(1, OrderKind::Limit, 50_000, 1, 0);
        let key = BookKey::of(&order);
        book.insert(order);

        assert!(book.get(&key).is_some());
        assert!(book.remove(&key).is_some());
        assert!(book.get(&key).is_none());
        assert!(book.is_empty());
    }
}
