//! Types library for the exchange core
//!
//! Core type definitions shared by the matching engine, the market data
//! state, the durable store and the broker pipelines.
//!
//! # Modules
//! - `ids`: Integer identifiers (InstrumentId, OrderId, TradeId, MarketDataId)
//! - `numeric`: Fixed-point decimal price type
//! - `order`: Order lifecycle types
//! - `trade`: Trade execution types
//! - `instrument`: Tradable instrument (security) with reference price
//! - `market_data`: Append-only price tick log
//! - `messages`: Broker wire messages (`orders` and `trades` topics)
//! - `feed`: Trades reported by an external venue
//! - `errors`: Error taxonomy

pub mod ids;
pub mod numeric;
pub mod order;
pub mod trade;
pub mod instrument;
pub mod market_data;
pub mod messages;
pub mod feed;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::order::*;
    pub use crate::trade::*;
    pub use crate::instrument::*;
    pub use crate::market_data::*;
    pub use crate::messages::*;
    pub use crate::feed::*;
    pub use crate::errors::*;
}
