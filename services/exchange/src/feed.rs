//! External Trade Feed Pipeline
//!
//! Consumes trades reported by an outside venue, keeps every trade once in
//! the store, moves each reported symbol to the last price of the batch and
//! notifies its market group. The feed is a price source only: its trades
//! never touch the order book.
//!
//! Feed trades are keyed by venue trade id. A redelivered trade is caught by
//! the in-memory window or, after a restart, by the stored copy.

use async_trait::async_trait;
use broker::{Cancellation, Consumer};
use chrono::Utc;
use market_data::{
    market_group, FeedPriceUpdate, MarketDataState, Notification, NotificationSink, PriceUpdate,
    TradeDeduplicator,
};
use persistence::{Mutation, Store, WriteBatch};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use types::feed::FeedTrade;
use types::ids::TradeId;
use types::market_data::MarketDataKind;
use types::numeric::Price;

use crate::error::PipelineError;
use crate::host::{next_batch, pause, Pipeline};
use crate::settings::FeedSettings;

/// Counts for one processed batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedSummary {
    pub consumed: usize,
    /// New trades persisted
    pub stored: usize,
    pub duplicates: usize,
    /// Undecodable or invalid payloads
    pub dropped: usize,
    /// Symbols whose price was moved and notified
    pub symbols: usize,
    /// Symbols whose price update failed or that no instrument lists
    pub skipped: usize,
}

/// Last reported trade per symbol, in order of first appearance
#[derive(Default)]
struct LatestPrices {
    index: HashMap<String, usize>,
    latest: Vec<(String, Price, u64)>,
}

impl LatestPrices {
    fn record(&mut self, trade: &FeedTrade) {
        let entry = (trade.symbol.clone(), trade.price, trade.volume());
        match self.index.get(&trade.symbol) {
            Some(slot) => self.latest[*slot] = entry,
            None => {
                self.index.insert(trade.symbol.clone(), self.latest.len());
                self.latest.push(entry);
            }
        }
    }
}

pub struct FeedIngestion {
    consumer: Box<dyn Consumer>,
    store: Arc<dyn Store>,
    market_data: Arc<MarketDataState>,
    sink: Arc<dyn NotificationSink>,
    dedup: TradeDeduplicator,
    settings: FeedSettings,
}

impl FeedIngestion {
    pub fn new(
        consumer: Box<dyn Consumer>,
        store: Arc<dyn Store>,
        market_data: Arc<MarketDataState>,
        sink: Arc<dyn NotificationSink>,
        settings: FeedSettings,
    ) -> Self {
        Self {
            consumer,
            store,
            market_data,
            sink,
            dedup: TradeDeduplicator::new(settings.dedup_window),
            settings,
        }
    }

    /// Process one batch.
    ///
    /// New trades are persisted in a single write before any price moves. A
    /// transient failure up to that point forgets the batch's trades and
    /// rewinds the consumer. Price updates that fail afterwards are logged
    /// and skipped; the next reported trade of that symbol supersedes them.
    pub async fn run_once(&mut self, cancel: &Cancellation) -> Result<FeedSummary, PipelineError> {
        let records = next_batch(
            &mut *self.consumer,
            self.settings.batch_wait(),
            self.settings.batch_size,
            cancel,
        )
        .await?;
        let mut summary = FeedSummary {
            consumed: records.len(),
            ..FeedSummary::default()
        };
        if records.is_empty() {
            return Ok(summary);
        }

        let mut fresh = Vec::new();
        for record in &records {
            let trade = match FeedTrade::decode(&record.payload) {
                Ok(trade) => trade,
                Err(err) => {
                    warn!(offset = record.offset, key = %record.key, error = %err, "feed trade dropped");
                    summary.dropped += 1;
                    continue;
                }
            };
            if !self.dedup.observe(TradeId::new(trade.trade_id)) {
                summary.duplicates += 1;
                continue;
            }
            fresh.push(trade);
        }

        let observed: Vec<TradeId> = fresh.iter().map(|t| TradeId::new(t.trade_id)).collect();
        let fresh = match self.persist(fresh, &mut summary) {
            Ok(stored) => stored,
            Err(err) => {
                for trade_id in observed {
                    self.dedup.forget(trade_id);
                }
                warn!(error = %err, "feed batch aborted, will be redelivered");
                self.consumer.seek_to_committed()?;
                return Err(err);
            }
        };

        let mut latest = LatestPrices::default();
        for trade in &fresh {
            latest.record(trade);
        }
        for (symbol, price, volume) in latest.latest {
            match self
                .market_data
                .update_price(&symbol, price, volume, MarketDataKind::Trade)
            {
                Ok(Some(_)) => {
                    self.notify(&symbol, price, volume);
                    summary.symbols += 1;
                }
                Ok(None) => summary.skipped += 1,
                Err(err) => {
                    warn!(symbol = %symbol, %price, error = %err, "feed price update failed");
                    summary.skipped += 1;
                }
            }
        }

        self.consumer.commit()?;
        debug!(
            consumed = summary.consumed,
            stored = summary.stored,
            duplicates = summary.duplicates,
            symbols = summary.symbols,
            "feed batch committed"
        );
        Ok(summary)
    }

    /// Drop trades the store already holds and write the rest in one batch.
    /// Returns the trades written.
    fn persist(
        &self,
        fresh: Vec<FeedTrade>,
        summary: &mut FeedSummary,
    ) -> Result<Vec<FeedTrade>, PipelineError> {
        let mut stored = Vec::with_capacity(fresh.len());
        let mut batch = WriteBatch::new();
        let mut known = 0;
        for trade in fresh {
            if self.store.feed_trade(trade.trade_id)?.is_some() {
                debug!(trade_id = trade.trade_id, "feed trade already stored");
                known += 1;
                continue;
            }
            batch.push(Mutation::InsertFeedTrade(trade.clone()));
            stored.push(trade);
        }
        self.store.commit(batch)?;
        summary.duplicates += known;
        summary.stored = stored.len();
        Ok(stored)
    }

    fn notify(&self, symbol: &str, price: Price, volume: u64) {
        let now = Utc::now();
        let group = market_group(symbol);
        self.sink.publish(
            &group,
            Notification::FeedPriceUpdate(FeedPriceUpdate {
                symbol: symbol.to_string(),
                price,
                volume,
                source: self.settings.source.clone(),
                timestamp: now,
            }),
        );
        self.sink.publish(
            &group,
            Notification::PriceUpdate(PriceUpdate {
                symbol: symbol.to_string(),
                price,
                timestamp: now,
            }),
        );
    }
}

#[async_trait]
impl Pipeline for FeedIngestion {
    fn name(&self) -> &'static str {
        "feed-ingestion"
    }

    async fn run(&mut self, cancel: &Cancellation) -> Result<(), PipelineError> {
        info!(
            batch_wait_ms = self.settings.batch_wait_ms,
            batch_size = self.settings.batch_size,
            source = %self.settings.source,
            "feed ingestion started"
        );
        let result = loop {
            if cancel.is_cancelled() {
                break Ok(());
            }
            match self.run_once(cancel).await {
                Ok(_) => {}
                Err(err) if err.is_cancelled() => break Ok(()),
                Err(err) if err.is_transient() => {
                    warn!(error = %err, "transient feed failure, retrying");
                    pause(self.settings.retry_backoff(), cancel).await;
                }
                Err(err) => break Err(err),
            }
        };
        self.consumer.close();
        result
    }
}
