//! Tradable instrument (security)
//!
//! The instrument row carries the reference price used to price
//! market-against-market crosses. It is mutated only by trade settlement.

use crate::errors::InstrumentError;
use crate::ids::InstrumentId;
use crate::numeric::Price;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum symbol length
pub const MAX_SYMBOL_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: InstrumentId,
    pub symbol: String,
    pub name: String,
    pub current_price: Price,
    pub previous_price: Price,
    /// Cumulative traded volume
    pub volume: u64,
    pub last_updated: DateTime<Utc>,
    pub active: bool,
}

impl Instrument {
    pub fn new(
        id: InstrumentId,
        symbol: impl Into<String>,
        name: impl Into<String>,
        current_price: Price,
        previous_price: Price,
        last_updated: DateTime<Utc>,
    ) -> Result<Self, InstrumentError> {
        let symbol = symbol.into();
        validate_symbol(&symbol)?;

        Ok(Self {
            id,
            symbol,
            name: name.into(),
            current_price,
            previous_price,
            volume: 0,
            last_updated,
            active: true,
        })
    }

    /// Whether a reference price exists yet
    pub fn has_reference_price(&self) -> bool {
        self.current_price.is_positive()
    }

    /// Shift current price to previous, take the new price and add volume
    pub fn apply_price(&mut self, price: Price, volume: u64, at: DateTime<Utc>) {
        self.previous_price = self.current_price;
        self.current_price = price;
        self.volume = self.volume.saturating_add(volume);
        self.last_updated = at;
    }
}

/// Check that a symbol is non-empty and at most `MAX_SYMBOL_LEN` characters
pub fn validate_symbol(symbol: &str) -> Result<(), InstrumentError> {
    if symbol.is_empty() {
        return Err(InstrumentError::InvalidSymbol {
            symbol: symbol.to_string(),
            reason: "symbol is empty".into(),
        });
    }
    if symbol.chars().count() > MAX_SYMBOL_LEN {
        return Err(InstrumentError::InvalidSymbol {
            symbol: symbol.to_string(),
            reason: format!("longer than {MAX_SYMBOL_LEN} characters"),
        });
    }
    Ok(())
}
