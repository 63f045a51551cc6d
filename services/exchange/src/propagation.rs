//! Trade Propagation Pipeline
//!
//! Consumes the `trades` topic, folds every new trade into the market data
//! state (tick log, instrument price, cache) and notifies the subscribers of
//! each traded symbol with a price update followed by a market update
//! carrying that symbol's trades from the batch.
//!
//! Trades are de-duplicated by trade id, so a redelivered batch moves no
//! price twice.

use async_trait::async_trait;
use broker::{Cancellation, Consumer};
use chrono::Utc;
use market_data::{
    market_group, MarketDataState, MarketUpdate, Notification, NotificationSink, PriceUpdate,
    TradeDeduplicator,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use types::market_data::MarketDataKind;
use types::messages::TradeMessage;

use crate::error::PipelineError;
use crate::host::{next_batch, pause, Pipeline};
use crate::settings::PropagationSettings;

/// Counts for one processed batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationSummary {
    pub consumed: usize,
    pub applied: usize,
    pub duplicates: usize,
    /// Undecodable payloads, unknown symbols, invalid prices
    pub dropped: usize,
    /// Symbols notified
    pub symbols: usize,
}

/// Trades of one batch grouped by symbol, in order of first appearance
#[derive(Default)]
struct SymbolGroups {
    index: HashMap<String, usize>,
    groups: Vec<(String, Vec<TradeMessage>)>,
}

impl SymbolGroups {
    fn push(&mut self, trade: TradeMessage) {
        let slot = match self.index.get(&trade.symbol) {
            Some(slot) => *slot,
            None => {
                self.index.insert(trade.symbol.clone(), self.groups.len());
                self.groups.push((trade.symbol.clone(), Vec::new()));
                self.groups.len() - 1
            }
        };
        self.groups[slot].1.push(trade);
    }
}

pub struct TradePropagation {
    consumer: Box<dyn Consumer>,
    market_data: Arc<MarketDataState>,
    sink: Arc<dyn NotificationSink>,
    dedup: TradeDeduplicator,
    settings: PropagationSettings,
}

impl TradePropagation {
    pub fn new(
        consumer: Box<dyn Consumer>,
        market_data: Arc<MarketDataState>,
        sink: Arc<dyn NotificationSink>,
        settings: PropagationSettings,
    ) -> Self {
        Self {
            consumer,
            market_data,
            sink,
            dedup: TradeDeduplicator::new(settings.dedup_window),
            settings,
        }
    }

    pub fn dedup(&self) -> &TradeDeduplicator {
        &self.dedup
    }

    /// Process one batch.
    ///
    /// On a transient store failure the trades applied so far are still
    /// notified, the failing trade is forgotten by the de-duplication window
    /// and the consumer rewinds so the rest of the batch is redelivered.
    pub async fn run_once(&mut self, cancel: &Cancellation) -> Result<PropagationSummary, PipelineError> {
        let records = next_batch(
            &mut *self.consumer,
            self.settings.batch_wait(),
            self.settings.batch_size,
            cancel,
        )
        .await?;
        let mut summary = PropagationSummary {
            consumed: records.len(),
            ..PropagationSummary::default()
        };
        if records.is_empty() {
            return Ok(summary);
        }

        let mut applied = SymbolGroups::default();
        for record in &records {
            let trade = match TradeMessage::decode(&record.payload) {
                Ok(trade) => trade,
                Err(err) => {
                    warn!(offset = record.offset, key = %record.key, error = %err, "undecodable trade message dropped");
                    summary.dropped += 1;
                    continue;
                }
            };

            if !self.dedup.observe(trade.trade_id) {
                debug!(trade_id = %trade.trade_id, "duplicate trade skipped");
                summary.duplicates += 1;
                continue;
            }

            match self.market_data.update_price(
                &trade.symbol,
                trade.price,
                trade.quantity,
                MarketDataKind::Trade,
            ) {
                Ok(Some(_)) => {
                    summary.applied += 1;
                    applied.push(trade);
                }
                Ok(None) => summary.dropped += 1,
                Err(err) if err.is_transient() => {
                    self.dedup.forget(trade.trade_id);
                    self.notify(applied);
                    warn!(trade_id = %trade.trade_id, error = %err, "trade batch aborted, will be redelivered");
                    self.consumer.seek_to_committed()?;
                    return Err(err.into());
                }
                Err(err) => {
                    warn!(trade_id = %trade.trade_id, symbol = %trade.symbol, error = %err, "trade rejected by market data");
                    summary.dropped += 1;
                }
            }
        }

        summary.symbols = self.notify(applied);
        self.consumer.commit()?;
        debug!(
            consumed = summary.consumed,
            applied = summary.applied,
            duplicates = summary.duplicates,
            symbols = summary.symbols,
            "trade batch committed"
        );
        Ok(summary)
    }

    /// Push a price update and a market update per symbol; returns the
    /// number of symbols notified
    fn notify(&self, applied: SymbolGroups) -> usize {
        let count = applied.groups.len();
        for (symbol, trades) in applied.groups {
            let now = Utc::now();
            let last_price = trades.last().map(|t| t.price).unwrap_or_default();
            let price = self.market_data.cached_price(&symbol).unwrap_or(last_price);
            let group = market_group(&symbol);

            self.sink.publish(
                &group,
                Notification::PriceUpdate(PriceUpdate {
                    symbol: symbol.clone(),
                    price,
                    timestamp: now,
                }),
            );
            self.sink.publish(
                &group,
                Notification::MarketUpdate(MarketUpdate {
                    symbol,
                    current_price: price,
                    trades,
                    last_updated: now,
                }),
            );
        }
        count
    }
}

#[async_trait]
impl Pipeline for TradePropagation {
    fn name(&self) -> &'static str {
        "trade-propagation"
    }

    async fn run(&mut self, cancel: &Cancellation) -> Result<(), PipelineError> {
        info!(
            batch_wait_ms = self.settings.batch_wait_ms,
            batch_size = self.settings.batch_size,
            dedup_window = self.settings.dedup_window,
            "trade propagation started"
        );
        let result = loop {
            if cancel.is_cancelled() {
                break Ok(());
            }
            match self.run_once(cancel).await {
                Ok(_) => {}
                Err(err) if err.is_cancelled() => break Ok(()),
                Err(err) if err.is_transient() => {
                    warn!(error = %err, "transient propagation failure, retrying");
                    pause(self.settings.retry_backoff(), cancel).await;
                }
                Err(err) => break Err(err),
            }
        };
        self.consumer.close();
        result
    }
}
