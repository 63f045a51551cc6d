//! Matching logic module
//!
//! Implements the crossing rule, execution price resolution and atomic
//! trade execution

pub mod crossing;
pub mod executor;

pub use crossing::can_match;
pub use executor::{resolve_price, Execution, MatchError, MatchExecutor};
