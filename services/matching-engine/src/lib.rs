//! Matching Engine Service
//!
//! Price-time priority matching of new orders against the resting orders of
//! their instrument. Every fill is committed to the durable store before the
//! in-memory book changes, so the books can always be rebuilt from the
//! store's open orders.
//!
//! **Key Invariants:**
//! - Market orders ahead of priced levels, better price first, earlier
//!   creation first within a level
//! - An order is never filled beyond its quantity
//! - Order status always follows from the filled quantity
//! - Both sides of a trade are filled by exactly the trade quantity
//! - No limit bid rests at or above a limit ask once a pass has finished

pub mod book;
pub mod matching;
pub mod engine;
pub mod events;

pub use book::{BookSnapshot, OrderBook};
pub use engine::{EngineError, MatchingEngine};
pub use events::{DropReason, MatchReport, OrderOutcome};
pub use matching::{resolve_price, MatchError};
