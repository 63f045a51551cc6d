//! Outcome structures for matching engine
//!
//! What one order event did to the book: the trades it produced with their
//! `trades` topic events, or why it was dropped.

use types::errors::{DecodeError, OrderError};
use types::ids::OrderId;
use types::messages::TradeMessage;
use types::order::Order;
use types::trade::Trade;

/// Result of one matching pass
#[derive(Debug, Clone)]
pub struct MatchReport {
    /// Incoming order as committed after the pass
    pub order: Order,
    pub trades: Vec<Trade>,
    /// Events to publish on the `trades` topic, one per trade
    pub events: Vec<TradeMessage>,
    /// Market against market crosses passed over for lack of a reference price
    pub skipped: usize,
}

impl MatchReport {
    pub fn new(order: Order) -> Self {
        Self {
            order,
            trades: Vec::new(),
            events: Vec::new(),
            skipped: 0,
        }
    }

    pub fn traded_quantity(&self) -> u64 {
        self.trades.iter().map(|t| t.quantity).sum()
    }
}

/// Why an order event was dropped without touching the book
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    UnknownAction(String),
    Malformed(DecodeError),
    UnknownInstrument(String),
    InactiveInstrument(String),
    InvalidOrder(OrderError),
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::UnknownAction(action) => write!(f, "unknown action {action:?}"),
            DropReason::Malformed(err) => write!(f, "malformed message: {err}"),
            DropReason::UnknownInstrument(symbol) => write!(f, "unknown instrument {symbol}"),
            DropReason::InactiveInstrument(symbol) => write!(f, "instrument {symbol} is inactive"),
            DropReason::InvalidOrder(err) => write!(f, "invalid order: {err}"),
        }
    }
}

/// Outcome of processing one order event
#[derive(Debug, Clone)]
pub enum OrderOutcome {
    /// New order stored and matched
    Accepted(MatchReport),
    /// Redelivered order that was still open; its matching pass was re-run
    Resumed(MatchReport),
    /// Redelivered order with nothing left to match
    Duplicate(OrderId),
    /// Action the core does not act upon
    Ignored(DropReason),
    Rejected(DropReason),
}

impl OrderOutcome {
    pub fn report(&self) -> Option<&MatchReport> {
        match self {
            OrderOutcome::Accepted(report) | OrderOutcome::Resumed(report) => Some(report),
            _ => None,
        }
    }

    /// Trade events produced by this order event
    pub fn trade_events(&self) -> &[TradeMessage] {
        self.report().map_or(&[], |report| report.events.as_slice())
    }

    pub fn label(&self) -> &'static str {
        match self {
            OrderOutcome::Accepted(_) => "accepted",
            OrderOutcome::Resumed(_) => "resumed",
            OrderOutcome::Duplicate(_) => "duplicate",
            OrderOutcome::Ignored(_) => "ignored",
            OrderOutcome::Rejected(_) => "rejected",
        }
    }
}
