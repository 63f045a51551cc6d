//! Unique identifier types for exchange entities
//!
//! Identifiers are store-assigned integers drawn from monotonically
//! increasing per-entity sequences, so they double as natural keys for
//! de-duplicating redelivered broker messages.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            pub const fn value(&self) -> u64 {
                self.0
            }

            /// Zero is never allocated by the store; wire messages use it
            /// to mean "not assigned yet".
            pub const fn is_unassigned(&self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

define_id!(
    /// Identifier of a tradable instrument
    InstrumentId
);

define_id!(
    /// Identifier of an order
    ///
    /// Orders allocated later always carry a larger id, which makes the id a
    /// stable secondary tie-break after the creation timestamp.
    OrderId
);

define_id!(
    /// Identifier of an executed trade
    TradeId
);

define_id!(
    /// Identifier of a market data tick
    MarketDataId
);

/// Client identifier (opaque string owned by the surrounding API)
pub type ClientId = String;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_id_ordering() {
        assert!(OrderId::new(1) < OrderId::new(2));
        assert_eq!(OrderId::from(7).value(), 7);
    }

    #[test]
    fn test_unassigned_id() {
        assert!(OrderId::new(0).is_unassigned());
        assert!(!TradeId::new(3).is_unassigned());
    }

    #[test]
    fn test_id_serializes_transparently() {
        let json = serde_json::to_string(&TradeId::new(42)).unwrap();
        assert_eq!(json, "42");

        let id: InstrumentId = serde_json::from_str("9").unwrap();
        assert_eq!(id, InstrumentId::new(9));
    }
}
