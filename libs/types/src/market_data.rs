//! Append-only market data tick log

use crate::ids::{InstrumentId, MarketDataId};
use crate::numeric::Price;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of price-affecting event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketDataKind {
    Trade,
    Quote,
    MarketOpen,
    MarketClose,
}

/// One row per price-affecting event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDataPoint {
    pub id: MarketDataId,
    pub instrument_id: InstrumentId,
    pub price: Price,
    pub volume: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: MarketDataKind,
}
