//! Order lifecycle types
//!
//! An order is created on ingestion and afterwards mutated only by fills
//! applied inside a matching pass. Status is never set directly: it is
//! always derived from the filled quantity.

use crate::errors::OrderError;
use crate::ids::{ClientId, InstrumentId, OrderId};
use crate::numeric::{weighted_average, Price};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Buy order (bid)
    Buy,
    /// Sell order (ask)
    Sell,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses the exact wire spelling ("Buy" / "Sell")
impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Buy" => Ok(Side::Buy),
            "Sell" => Ok(Side::Sell),
            other => Err(other.to_string()),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderKind {
    /// Execute at the best available price; stored with price 0
    Market,
    /// Execute only at the limit price or better
    Limit,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Market => "Market",
            OrderKind::Limit => "Limit",
        }
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses the exact wire spelling ("Market" / "Limit")
impl FromStr for OrderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Market" => Ok(OrderKind::Market),
            "Limit" => Ok(OrderKind::Limit),
            other => Err(other.to_string()),
        }
    }
}

/// Order status
///
/// `Pending -> PartiallyFilled -> Filled` is the only path driven by fills.
/// `Cancelled` and `Rejected` are administrative states set outside the
/// matching engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Fill-state rule: status as a pure function of filled vs total quantity
    pub fn from_fill(filled: u64, quantity: u64) -> Self {
        if filled == 0 {
            OrderStatus::Pending
        } else if filled >= quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        }
    }

    /// Open orders are eligible to rest on the book and be matched
    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::PartiallyFilled)
    }
}

/// Complete order record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub client_id: ClientId,
    pub instrument_id: InstrumentId,
    pub kind: OrderKind,
    pub side: Side,
    pub quantity: u64,
    /// Limit price; always zero for market orders
    pub price: Price,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub filled_quantity: u64,
    pub avg_execution_price: Option<Decimal>,
}

impl Order {
    /// Create a new pending order
    ///
    /// Market orders have their price forced to zero. Limit orders must carry
    /// a positive price, and every order a positive quantity.
    #[allow(clippy::too_many_arguments)]
    pub fn new_pending(
        id: OrderId,
        client_id: impl Into<ClientId>,
        instrument_id: InstrumentId,
        kind: OrderKind,
        side: Side,
        quantity: u64,
        price: Price,
        created_at: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        if quantity == 0 {
            return Err(OrderError::InvalidQuantity("quantity must be positive".into()));
        }

        let price = match kind {
            OrderKind::Market => Price::ZERO,
            OrderKind::Limit if !price.is_positive() => {
                return Err(OrderError::InvalidPrice(format!(
                    "limit price must be positive, got {price}"
                )));
            }
            OrderKind::Limit => price,
        };

        Ok(Self {
            id,
            client_id: client_id.into(),
            instrument_id,
            kind,
            side,
            quantity,
            price,
            status: OrderStatus::Pending,
            created_at,
            executed_at: None,
            filled_quantity: 0,
            avg_execution_price: None,
        })
    }

    /// Quantity still available to match
    pub fn remaining(&self) -> u64 {
        self.quantity.saturating_sub(self.filled_quantity)
    }

    pub fn is_market(&self) -> bool {
        self.kind == OrderKind::Market
    }

    /// Open and with quantity left to trade
    pub fn is_open(&self) -> bool {
        self.status.is_open() && self.remaining() > 0
    }

    /// Check fill invariants: bounded fill and status derived from it
    pub fn check_invariant(&self) -> bool {
        if self.filled_quantity > self.quantity {
            return false;
        }
        match self.status {
            OrderStatus::Cancelled | OrderStatus::Rejected => true,
            status => status == OrderStatus::from_fill(self.filled_quantity, self.quantity),
        }
    }

    /// Return a copy of this order with one more fill applied
    ///
    /// The receiver is left untouched so callers can stage the change,
    /// commit it durably and only then replace their in-memory copy.
    pub fn with_fill(
        &self,
        quantity: u64,
        price: Price,
        executed_at: DateTime<Utc>,
    ) -> Result<Order, OrderError> {
        if quantity == 0 {
            return Err(OrderError::InvalidQuantity("fill quantity must be positive".into()));
        }
        if quantity > self.remaining() {
            return Err(OrderError::Overfill {
                order_id: self.id.value(),
                fill: quantity,
                filled: self.filled_quantity,
                quantity: self.quantity,
            });
        }

        let mut next = self.clone();
        next.avg_execution_price = Some(weighted_average(
            self.avg_execution_price,
            self.filled_quantity,
            price,
            quantity,
        ));
        next.filled_quantity += quantity;
        next.executed_at = Some(executed_at);
        next.status = OrderStatus::from_fill(next.filled_quantity, next.quantity);
        Ok(next)
    }
}
