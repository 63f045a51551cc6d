//! External trade feed messages
//!
//! Trades executed on an outside venue arrive as JSON. Two spellings of the
//! keys are accepted: descriptive keys (`TradingSymbol`, `TradeId`, ...) as
//! written by the feed relay, and the venue's compact stream keys (`s`, `t`,
//! `p`, `q`, ...). Prices and quantities travel as decimal strings, times as
//! epoch milliseconds.

use crate::errors::DecodeError;
use crate::numeric::Price;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedTrade {
    #[serde(rename = "TradingSymbol", alias = "s")]
    pub symbol: String,
    /// Venue trade id, the natural key of a feed trade
    #[serde(rename = "TradeId", alias = "t")]
    pub trade_id: u64,
    #[serde(rename = "Price", alias = "p")]
    pub price: Price,
    #[serde(rename = "Quantity", alias = "q")]
    pub quantity: Decimal,
    #[serde(rename = "EventType", alias = "e", default)]
    pub event_type: String,
    #[serde(
        rename = "EventTime",
        alias = "E",
        default,
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub event_time: Option<DateTime<Utc>>,
    #[serde(
        rename = "TradeCompletedTime",
        alias = "T",
        default,
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub traded_at: Option<DateTime<Utc>>,
}

impl FeedTrade {
    /// Decode and validate one feed payload
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let trade: FeedTrade = serde_json::from_slice(payload)?;
        trade.validate()?;
        Ok(trade)
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        let invalid =
            |field: &'static str, reason: String| Err(DecodeError::InvalidField { field, reason });

        if self.symbol.trim().is_empty() {
            return invalid("symbol", "must not be empty".into());
        }
        if self.trade_id == 0 {
            return invalid("trade_id", "must be positive".into());
        }
        if !self.price.is_positive() {
            return invalid("price", format!("must be positive, got {}", self.price));
        }
        if self.quantity <= Decimal::ZERO {
            return invalid("quantity", format!("must be positive, got {}", self.quantity));
        }
        Ok(())
    }

    /// Whole units traded; the fractional part does not count as volume
    pub fn volume(&self) -> u64 {
        self.quantity.trunc().to_u64().unwrap_or(0)
    }
}
