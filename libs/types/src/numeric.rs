//! Fixed-point decimal types for prices
//!
//! Uses rust_decimal for deterministic arithmetic (no floating-point errors).
//! Prices carry two decimal places and are rounded half away from zero.
//! Quantities are whole units and are modelled as plain `u64`.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Number of decimal places carried by every `Price`
pub const PRICE_SCALE: u32 = 2;

/// Number of decimal places kept for average execution prices
pub const AVG_PRICE_SCALE: u32 = 8;

/// Price with fixed two-decimal precision
///
/// A zero price is meaningful: it is the stored price of every market order
/// and the "no reference price yet" value of an instrument. Positivity is
/// checked where it is required (limit orders, trades).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Price(Decimal);

impl Price {
    pub const ZERO: Price = Price(Decimal::ZERO);

    /// Create a price, rounding to two decimal places
    pub fn new(value: Decimal) -> Self {
        Self(value.round_dp_with_strategy(PRICE_SCALE, RoundingStrategy::MidpointAwayFromZero))
    }

    /// Create a price from whole currency units
    pub fn from_u64(value: u64) -> Self {
        Self::new(Decimal::from(value))
    }

    /// Create a price from an integer amount of cents
    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, PRICE_SCALE))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Notional value of `quantity` units at this price
    pub fn notional(&self, quantity: u64) -> Decimal {
        self.0 * Decimal::from(quantity)
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim()).map(Self::new)
    }
}

impl From<Decimal> for Price {
    fn from(value: Decimal) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

// Prices travel as strings so no precision is lost in transit. Human-readable
// inputs (JSON) may also carry a plain number; binary formats only ever see
// the string form.
impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct PriceVisitor;

impl<'de> Visitor<'de> for PriceVisitor {
    type Value = Price;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a decimal price as a string or number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Price, E> {
        Price::from_str(v).map_err(|e| E::custom(format!("invalid price {v:?}: {e}")))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Price, E> {
        Ok(Price::new(Decimal::from(v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Price, E> {
        Ok(Price::new(Decimal::from(v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Price, E> {
        Decimal::from_f64_retain(v)
            .map(Price::new)
            .ok_or_else(|| E::custom(format!("invalid price {v}")))
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_any(PriceVisitor)
        } else {
            deserializer.deserialize_str(PriceVisitor)
        }
    }
}

/// Quantity-weighted average of an existing average and a new fill
///
/// `previous` covers `filled` units; the result covers `filled + quantity`
/// units and is rounded to eight decimal places.
pub fn weighted_average(
    previous: Option<Decimal>,
    filled: u64,
    price: Price,
    quantity: u64,
) -> Decimal {
    let total = filled + quantity;
    if total == 0 {
        return price.as_decimal();
    }
    let prior = previous.unwrap_or(Decimal::ZERO) * Decimal::from(filled);
    let value = (prior + price.notional(quantity)) / Decimal::from(total);
    value.round_dp_with_strategy(AVG_PRICE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}
