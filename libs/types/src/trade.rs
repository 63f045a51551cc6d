//! Trade execution types
//!
//! A trade is created exactly once, inside the executor's atomic commit,
//! and is immutable afterwards.

use crate::errors::TradeError;
use crate::ids::{InstrumentId, OrderId, TradeId};
use crate::numeric::Price;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Executed trade between one buy order and one sell order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub instrument_id: InstrumentId,
    pub quantity: u64,
    pub price: Price,
    pub executed_at: DateTime<Utc>,
}

impl Trade {
    /// Create a trade, checking its structural invariants
    pub fn new(
        id: TradeId,
        buy_order_id: OrderId,
        sell_order_id: OrderId,
        instrument_id: InstrumentId,
        quantity: u64,
        price: Price,
        executed_at: DateTime<Utc>,
    ) -> Result<Self, TradeError> {
        if buy_order_id == sell_order_id {
            return Err(TradeError::InvalidTrade {
                reason: format!("buy and sell order are both {buy_order_id}"),
            });
        }
        if quantity == 0 {
            return Err(TradeError::InvalidTrade {
                reason: "quantity must be positive".into(),
            });
        }
        if !price.is_positive() {
            return Err(TradeError::InvalidTrade {
                reason: format!("price must be positive, got {price}"),
            });
        }

        Ok(Self {
            id,
            buy_order_id,
            sell_order_id,
            instrument_id,
            quantity,
            price,
            executed_at,
        })
    }

    /// Calculate trade value (price × quantity)
    pub fn trade_value(&self) -> Decimal {
        self.price.notional(self.quantity)
    }
}
