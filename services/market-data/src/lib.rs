//! Market Data Service
//!
//! Owns the per-symbol price cache that the matching engine reads and trade
//! settlement writes, and the notification channel that carries price and
//! market updates to subscribers.
//!
//! # Architecture
//!
//! ```text
//! Trade batch (propagation pipeline)
//!        │
//!    ┌───▼───┐
//!    │Dedup  │  ← Drops redelivered trades by trade id
//!    └───┬───┘
//!        │
//!  ┌─────▼──────┐     ┌───────┐
//!  │ State      │◄────┤ Store │  ← Instrument rows + tick log
//!  │ (cache)    │     └───────┘
//!  └─────┬──────┘
//!        │
//!  ┌─────▼──────────────┐
//!  │ Notifications      │  ← market-{symbol} groups
//!  └────────────────────┘
//! ```

pub mod dedup;
pub mod error;
pub mod notify;
pub mod state;

pub use dedup::TradeDeduplicator;
pub use error::MarketDataError;
pub use notify::{
    market_group, BroadcastHub, FeedPriceUpdate, MarketUpdate, Notification, NotificationSink,
    PriceUpdate,
};
pub use state::{CachedPrice, MarketDataState, PriceChange};

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
