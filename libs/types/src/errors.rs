//! Error types for the exchange domain
//!
//! Domain-level error taxonomy using thiserror. Storage, broker and pipeline
//! errors live next to the crates that raise them.

use thiserror::Error;

/// Order-specific errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrderError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Fill of {fill} would exceed order {order_id} quantity {quantity} (already filled {filled})")]
    Overfill {
        order_id: u64,
        fill: u64,
        filled: u64,
        quantity: u64,
    },

    #[error("Order not found: {order_id}")]
    NotFound { order_id: u64 },
}

/// Trade-specific errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TradeError {
    #[error("Trade not found: {trade_id}")]
    NotFound { trade_id: u64 },

    #[error("Invalid trade: {reason}")]
    InvalidTrade { reason: String },
}

/// Instrument-specific errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InstrumentError {
    #[error("Invalid symbol {symbol:?}: {reason}")]
    InvalidSymbol { symbol: String, reason: String },

    #[error("Unknown instrument: {symbol}")]
    Unknown { symbol: String },
}

/// Failure to turn a broker payload into a domain message
///
/// Every variant is a "malformed message": the message is dropped and
/// logged, and processing continues with the next one.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Undecodable payload: {0}")]
    Payload(String),

    #[error("Unknown order type: {0:?}")]
    UnknownOrderType(String),

    #[error("Unknown side: {0:?}")]
    UnknownSide(String),

    #[error("Unknown action: {0:?}")]
    UnknownAction(String),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Payload(err.to_string())
    }
}
