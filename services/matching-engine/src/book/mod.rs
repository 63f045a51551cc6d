//! Order book infrastructure module
//!
//! Contains price levels, bid book, ask book and the per-instrument book
//! that pairs them. Books hold the open orders of one instrument and are
//! mirrored from the durable store: every change is applied here only after
//! it has been committed there.

pub mod price_level;
pub mod bid_book;
pub mod ask_book;

pub use price_level::{PriceLevel, Priority};
pub use bid_book::BidBook;
pub use ask_book::AskBook;

use serde::Serialize;
use types::ids::InstrumentId;
use types::numeric::Price;
use types::order::{Order, Side};

/// Level a resting order lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Market orders, ahead of every priced level
    Market,
    Limit(Price),
}

/// Location of a resting order within one side of a book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BookKey {
    pub slot: Slot,
    pub priority: Priority,
}

impl BookKey {
    pub fn of(order: &Order) -> Self {
        let slot = if order.is_market() {
            Slot::Market
        } else {
            Slot::Limit(order.price)
        };
        Self {
            slot,
            priority: Priority::of(order),
        }
    }
}

/// Aggregated depth of one book
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSnapshot {
    pub instrument_id: InstrumentId,
    pub bids: Vec<(Price, u64)>,
    pub asks: Vec<(Price, u64)>,
    /// Remaining quantity of resting market orders per side
    pub market_bids: u64,
    pub market_asks: u64,
}

/// Both sides of one instrument's book
#[derive(Debug, Clone)]
pub struct OrderBook {
    instrument_id: InstrumentId,
    pub bids: BidBook,
    pub asks: AskBook,
}

impl OrderBook {
    pub fn new(instrument_id: InstrumentId) -> Self {
        Self {
            instrument_id,
            bids: BidBook::new(),
            asks: AskBook::new(),
        }
    }

    pub fn instrument_id(&self) -> InstrumentId {
        self.instrument_id
    }

    /// Rest an open order on its side. Orders with nothing left are ignored.
    pub fn rest(&mut self, order: Order) {
        if !order.is_open() {
            return;
        }
        match order.side {
            Side::Buy => self.bids.insert(order),
            Side::Sell => self.asks.insert(order),
        }
    }

    /// Take an order off the book
    pub fn remove(&mut self, order: &Order) -> Option<Order> {
        let key = BookKey::of(order);
        match order.side {
            Side::Buy => self.bids.remove(&key),
            Side::Sell => self.asks.remove(&key),
        }
    }

    /// Resting order of `side` at `key`
    pub fn get(&self, side: Side, key: &BookKey) -> Option<&Order> {
        match side {
            Side::Buy => self.bids.get(key),
            Side::Sell => self.asks.get(key),
        }
    }

    /// Replace a resting order with its updated copy
    pub fn update(&mut self, order: Order) -> bool {
        match order.side {
            Side::Buy => self.bids.update(order),
            Side::Sell => self.asks.update(order),
        }
    }

    /// The side an incoming order of `side` matches against
    pub fn opposite(&self, side: Side) -> OppositeSide<'_> {
        match side {
            Side::Buy => OppositeSide::Asks(&self.asks),
            Side::Sell => OppositeSide::Bids(&self.bids),
        }
    }

    pub fn order_count(&self) -> usize {
        self.bids.order_count() + self.asks.order_count()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn snapshot(&self, depth: usize) -> BookSnapshot {
        BookSnapshot {
            instrument_id: self.instrument_id,
            bids: self.bids.depth_snapshot(depth),
            asks: self.asks.depth_snapshot(depth),
            market_bids: self.bids.market_quantity(),
            market_asks: self.asks.market_quantity(),
        }
    }
}

/// Read view of the side an incoming order matches against
pub enum OppositeSide<'a> {
    Bids(&'a BidBook),
    Asks(&'a AskBook),
}

impl OppositeSide<'_> {
    /// Resting orders an incoming order may match, best first
    pub fn candidates(&self, limit: Option<Price>) -> Vec<BookKey> {
        match self {
            OppositeSide::Bids(bids) => bids.candidates(limit),
            OppositeSide::Asks(asks) => asks.candidates(limit),
        }
    }
}
