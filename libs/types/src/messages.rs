//! Broker wire messages
//!
//! Both topics carry camelCase JSON keyed by instrument symbol:
//! - `orders`: [`OrderMessage`] submit events
//! - `trades`: [`TradeMessage`] settlement events
//!
//! Order messages keep their enum fields as strings on the wire so an
//! unknown value can be reported as a malformed message instead of failing
//! the whole payload decode without context.

use crate::errors::DecodeError;
use crate::ids::{ClientId, OrderId, TradeId};
use crate::instrument::validate_symbol;
use crate::numeric::Price;
use crate::order::{OrderKind, Side};
use crate::trade::Trade;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The only order action the core acts upon
pub const ACTION_NEW: &str = "NEW";

/// Order-submit event on the `orders` topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderMessage {
    /// Pre-allocated order id, or 0 to let the engine allocate one
    #[serde(default)]
    pub order_id: u64,
    pub client_id: ClientId,
    pub symbol: String,
    pub order_type: String,
    pub side: String,
    pub quantity: i64,
    #[serde(default)]
    pub price: Price,
    pub timestamp: DateTime<Utc>,
    pub action: String,
}

/// Recognized order actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderAction {
    New,
}

/// Validated content of a `NEW` order message
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub order_id: OrderId,
    pub client_id: ClientId,
    pub symbol: String,
    pub kind: OrderKind,
    pub side: Side,
    pub quantity: u64,
    pub price: Price,
    pub timestamp: DateTime<Utc>,
}

impl OrderMessage {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Actions are matched case-insensitively
    pub fn action(&self) -> Result<OrderAction, DecodeError> {
        if self.action.eq_ignore_ascii_case(ACTION_NEW) {
            Ok(OrderAction::New)
        } else {
            Err(DecodeError::UnknownAction(self.action.clone()))
        }
    }

    /// Parse the enum fields and check basic field constraints
    pub fn to_new_order(&self) -> Result<NewOrder, DecodeError> {
        let kind = self
            .order_type
            .parse::<OrderKind>()
            .map_err(DecodeError::UnknownOrderType)?;
        let side = self.side.parse::<Side>().map_err(DecodeError::UnknownSide)?;

        let quantity = u64::try_from(self.quantity)
            .ok()
            .filter(|q| *q > 0)
            .ok_or_else(|| DecodeError::InvalidField {
                field: "quantity",
                reason: format!("must be positive, got {}", self.quantity),
            })?;

        validate_symbol(&self.symbol).map_err(|e| DecodeError::InvalidField {
            field: "symbol",
            reason: e.to_string(),
        })?;

        Ok(NewOrder {
            order_id: OrderId::new(self.order_id),
            client_id: self.client_id.clone(),
            symbol: self.symbol.clone(),
            kind,
            side,
            quantity,
            price: self.price,
            timestamp: self.timestamp,
        })
    }
}

/// Trade-settlement event on the `trades` topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeMessage {
    pub trade_id: TradeId,
    pub symbol: String,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buyer_client_id: ClientId,
    pub seller_client_id: ClientId,
    pub quantity: u64,
    pub price: Price,
    pub executed_at: DateTime<Utc>,
}

impl TradeMessage {
    pub fn from_trade(
        trade: &Trade,
        symbol: impl Into<String>,
        buyer_client_id: impl Into<ClientId>,
        seller_client_id: impl Into<ClientId>,
    ) -> Self {
        Self {
            trade_id: trade.id,
            symbol: symbol.into(),
            buy_order_id: trade.buy_order_id,
            sell_order_id: trade.sell_order_id,
            buyer_client_id: buyer_client_id.into(),
            seller_client_id: seller_client_id.into(),
            quantity: trade.quantity,
            price: trade.price,
            executed_at: trade.executed_at,
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
