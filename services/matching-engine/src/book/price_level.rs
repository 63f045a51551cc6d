//! Price level with time-priority queue
//!
//! A price level contains all resting orders at one price point (or, for
//! the market level, all resting market orders). Orders are kept ordered by
//! creation time, with the order id as tie-break, so a level rebuilt from
//! the store after a restart has exactly the same priority as before.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use types::ids::OrderId;
use types::order::Order;

/// Time priority of a resting order within its level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority {
    pub created_at: DateTime<Utc>,
    pub order_id: OrderId,
}

impl Priority {
    pub fn of(order: &Order) -> Self {
        Self {
            created_at: order.created_at,
            order_id: order.id,
        }
    }
}

/// A price level containing resting orders
#[derive(Debug, Clone, Default)]
pub struct PriceLevel {
    /// Resting orders, earliest first
    orders: BTreeMap<Priority, Order>,
    /// Total remaining quantity at this level
    total_quantity: u64,
}

impl PriceLevel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an order at its time priority
    pub fn insert(&mut self, order: Order) {
        self.total_quantity += order.remaining();
        if let Some(previous) = self.orders.insert(Priority::of(&order), order) {
            self.total_quantity -= previous.remaining();
        }
    }

    /// Remove an order, returning it if it was present
    pub fn remove(&mut self, priority: &Priority) -> Option<Order> {
        let order = self.orders.remove(priority)?;
        self.total_quantity -= order.remaining();
        Some(order)
    }

    /// Replace a resting order with its updated copy.
    ///
    /// An order that is no longer open leaves the level. Returns `false` if
    /// the order was not resting here.
    pub fn update(&mut self, order: Order) -> bool {
        let priority = Priority::of(&order);
        let Some(current) = self.orders.get_mut(&priority) else {
            return false;
        };
        self.total_quantity -= current.remaining();
        if order.is_open() {
            self.total_quantity += order.remaining();
            *current = order;
        } else {
            self.orders.remove(&priority);
        }
        true
    }

    pub fn get(&self, priority: &Priority) -> Option<&Order> {
        self.orders.get(priority)
    }

    /// Earliest resting order
    pub fn front(&self) -> Option<&Order> {
        self.orders.values().next()
    }

    /// Priorities in time order
    pub fn priorities(&self) -> impl Iterator<Item = Priority> + '_ {
        self.orders.keys().copied()
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn total_quantity(&self) -> u64 {
        self.total_quantity
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}
