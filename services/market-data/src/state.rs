//! Market data state
//!
//! In-memory price cache per symbol, backed by the instrument and tick rows
//! of the durable store. The cache is shared by the matching engine and the
//! trade propagation pipeline. Entries are last-writer-wins: all writers for
//! one instrument are serialized upstream by the single ordered order stream.

use crate::error::MarketDataError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use persistence::{Mutation, Store, WriteBatch};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use types::prelude::*;

/// Cached price of one symbol
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachedPrice {
    pub price: Price,
    pub last_updated: DateTime<Utc>,
}

/// Outcome of a successful [`MarketDataState::update_price`]
#[derive(Debug, Clone, PartialEq)]
pub struct PriceChange {
    pub instrument: Instrument,
    pub point: MarketDataPoint,
}

pub struct MarketDataState {
    store: Arc<dyn Store>,
    cache: RwLock<HashMap<String, CachedPrice>>,
}

impl MarketDataState {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Load the last known price of every active instrument into the cache.
    ///
    /// Returns the number of symbols cached.
    pub fn warm_up(&self) -> Result<usize, MarketDataError> {
        let instruments = self.store.active_instruments()?;
        let mut cache = self.cache.write();
        for instrument in &instruments {
            cache.insert(
                instrument.symbol.clone(),
                CachedPrice {
                    price: instrument.current_price,
                    last_updated: instrument.last_updated,
                },
            );
        }
        info!(symbols = instruments.len(), "price cache warmed up");
        Ok(instruments.len())
    }

    /// Record a price-affecting event for `symbol`.
    ///
    /// Appends a tick, shifts the instrument's current price to previous,
    /// takes the new price and adds the volume, all in one store commit.
    /// The cache is refreshed only after the commit succeeded.
    ///
    /// An unknown symbol is logged and yields `Ok(None)`.
    pub fn update_price(
        &self,
        symbol: &str,
        price: Price,
        volume: u64,
        kind: MarketDataKind,
    ) -> Result<Option<PriceChange>, MarketDataError> {
        if !price.is_positive() {
            return Err(MarketDataError::InvalidPrice {
                symbol: symbol.to_string(),
                price: price.to_string(),
            });
        }

        let Some(mut instrument) = self.store.instrument_by_symbol(symbol)? else {
            warn!(symbol, %price, volume, "market data update for unknown symbol ignored");
            return Ok(None);
        };

        let now = Utc::now();
        let point = MarketDataPoint {
            id: self.store.allocate_market_data_id()?,
            instrument_id: instrument.id,
            price,
            volume,
            timestamp: now,
            kind,
        };
        instrument.apply_price(price, volume, now);

        let mut batch = WriteBatch::new();
        batch
            .push(Mutation::InsertMarketData(point.clone()))
            .push(Mutation::UpsertInstrument(instrument.clone()));
        self.store.commit(batch)?;

        self.cache.write().insert(
            symbol.to_string(),
            CachedPrice {
                price,
                last_updated: now,
            },
        );
        debug!(symbol, %price, volume, kind = ?kind, "market data updated");

        Ok(Some(PriceChange { instrument, point }))
    }

    /// Current price of `symbol`.
    ///
    /// Served from the cache when present; otherwise read from the store
    /// and cached. An unknown symbol yields zero.
    pub fn current_price(&self, symbol: &str) -> Result<Price, MarketDataError> {
        if let Some(cached) = self.cached_price(symbol) {
            return Ok(cached);
        }

        match self.store.instrument_by_symbol(symbol)? {
            Some(instrument) => {
                self.cache.write().insert(
                    symbol.to_string(),
                    CachedPrice {
                        price: instrument.current_price,
                        last_updated: instrument.last_updated,
                    },
                );
                Ok(instrument.current_price)
            }
            None => Ok(Price::ZERO),
        }
    }

    /// Cache-only read, no store fallback
    pub fn cached_price(&self, symbol: &str) -> Option<Price> {
        self.cache.read().get(symbol).map(|c| c.price)
    }

    pub fn cached(&self, symbol: &str) -> Option<CachedPrice> {
        self.cache.read().get(symbol).copied()
    }

    /// Ticks of `symbol` with `from <= timestamp <= to`, ascending.
    /// Empty for an unknown symbol.
    pub fn price_history(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MarketDataPoint>, MarketDataError> {
        match self.store.instrument_by_symbol(symbol)? {
            Some(instrument) => Ok(self.store.market_data(instrument.id, from, to)?),
            None => Ok(Vec::new()),
        }
    }

    /// Most recent tick of `symbol`
    pub fn latest(&self, symbol: &str) -> Result<Option<MarketDataPoint>, MarketDataError> {
        match self.store.instrument_by_symbol(symbol)? {
            Some(instrument) => Ok(self.store.latest_market_data(instrument.id)?),
            None => Ok(None),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}
