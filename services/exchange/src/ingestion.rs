//! Order Ingestion Pipeline
//!
//! Consumes the `orders` topic in bounded batches, runs each order event
//! through the matching engine strictly in arrival order and publishes the
//! resulting trade events on the `trades` topic. Offsets are committed only
//! after every trade event of the batch has been delivered.
//!
//! Trade events wait in an outbox until delivered. A non-empty outbox is
//! drained before anything new is consumed.

use async_trait::async_trait;
use broker::{produce_batch, Cancellation, Consumer, OutboundMessage, Producer};
use matching_engine::{MatchingEngine, OrderOutcome};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use types::messages::{OrderMessage, TradeMessage};

use crate::error::PipelineError;
use crate::host::{next_batch, pause, Pipeline};
use crate::settings::IngestionSettings;

/// Counts for one processed batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionSummary {
    pub consumed: usize,
    pub accepted: usize,
    pub resumed: usize,
    pub duplicates: usize,
    /// Malformed payloads, unknown actions, rejected orders
    pub dropped: usize,
    /// Orders that failed permanently and were skipped
    pub failed: usize,
    pub trades: usize,
}

impl IngestionSummary {
    fn record(&mut self, outcome: &OrderOutcome) {
        match outcome {
            OrderOutcome::Accepted(_) => self.accepted += 1,
            OrderOutcome::Resumed(_) => self.resumed += 1,
            OrderOutcome::Duplicate(_) => self.duplicates += 1,
            OrderOutcome::Ignored(_) | OrderOutcome::Rejected(_) => self.dropped += 1,
        }
        self.trades += outcome.trade_events().len();
    }
}

pub struct OrderIngestion {
    consumer: Box<dyn Consumer>,
    producer: Arc<dyn Producer>,
    engine: MatchingEngine,
    trades_topic: String,
    settings: IngestionSettings,
    outbox: Vec<OutboundMessage>,
}

impl OrderIngestion {
    pub fn new(
        consumer: Box<dyn Consumer>,
        producer: Arc<dyn Producer>,
        engine: MatchingEngine,
        trades_topic: impl Into<String>,
        settings: IngestionSettings,
    ) -> Self {
        Self {
            consumer,
            producer,
            engine,
            trades_topic: trades_topic.into(),
            settings,
            outbox: Vec::new(),
        }
    }

    pub fn engine(&self) -> &MatchingEngine {
        &self.engine
    }

    /// Trade events waiting for delivery
    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    /// Process one batch.
    ///
    /// A transient failure aborts the batch: nothing is committed, the
    /// consumer rewinds to the committed offsets and the batch is redelivered
    /// at the next call. Permanent per-order failures are logged and skipped.
    pub async fn run_once(&mut self, cancel: &Cancellation) -> Result<IngestionSummary, PipelineError> {
        self.flush_outbox(cancel).await?;

        let records = next_batch(
            &mut *self.consumer,
            self.settings.batch_wait(),
            self.settings.batch_size,
            cancel,
        )
        .await?;
        let mut summary = IngestionSummary {
            consumed: records.len(),
            ..IngestionSummary::default()
        };
        if records.is_empty() {
            return Ok(summary);
        }

        for record in &records {
            let message = match OrderMessage::decode(&record.payload) {
                Ok(message) => message,
                Err(err) => {
                    warn!(
                        partition = record.partition,
                        offset = record.offset,
                        key = %record.key,
                        error = %err,
                        "undecodable order message dropped"
                    );
                    summary.dropped += 1;
                    continue;
                }
            };

            match self.engine.process_new_order(&message) {
                Ok(outcome) => {
                    summary.record(&outcome);
                    self.stage(outcome.trade_events());
                }
                Err(err) => {
                    self.stage(err.committed_events());
                    if err.is_transient() {
                        warn!(
                            offset = record.offset,
                            symbol = %message.symbol,
                            error = %err,
                            "batch aborted, uncommitted orders will be redelivered"
                        );
                        self.consumer.seek_to_committed()?;
                        return Err(err.into());
                    }
                    error!(
                        offset = record.offset,
                        symbol = %message.symbol,
                        error = %err,
                        "order processing failed"
                    );
                    summary.failed += 1;
                }
            }
        }

        if let Err(err) = self.flush_outbox(cancel).await {
            self.consumer.seek_to_committed()?;
            return Err(err);
        }
        self.consumer.commit()?;

        debug!(
            consumed = summary.consumed,
            accepted = summary.accepted,
            dropped = summary.dropped,
            trades = summary.trades,
            "order batch committed"
        );
        Ok(summary)
    }

    fn stage(&mut self, events: &[TradeMessage]) {
        for event in events {
            match event.encode() {
                Ok(payload) => self
                    .outbox
                    .push(OutboundMessage::new(event.symbol.clone(), payload)),
                Err(err) => {
                    error!(trade_id = %event.trade_id, error = %err, "trade event could not be encoded");
                }
            }
        }
    }

    /// Deliver the outbox; it is kept whole on any failure and re-sent later
    async fn flush_outbox(&mut self, cancel: &Cancellation) -> Result<(), PipelineError> {
        if self.outbox.is_empty() {
            return Ok(());
        }
        let pending = self.outbox.len();
        match produce_batch(
            &*self.producer,
            &self.trades_topic,
            self.outbox.clone(),
            self.settings.flush_timeout(),
            cancel,
        )
        .await
        {
            Ok(delivered) => {
                debug!(delivered, topic = %self.trades_topic, "trade events published");
                self.outbox.clear();
                Ok(())
            }
            Err(err) => {
                warn!(pending, error = %err, "trade events kept for redelivery");
                Err(err.into())
            }
        }
    }
}

#[async_trait]
impl Pipeline for OrderIngestion {
    fn name(&self) -> &'static str {
        "order-ingestion"
    }

    async fn run(&mut self, cancel: &Cancellation) -> Result<(), PipelineError> {
        info!(
            batch_wait_ms = self.settings.batch_wait_ms,
            batch_size = self.settings.batch_size,
            "order ingestion started"
        );
        let result = loop {
            if cancel.is_cancelled() {
                break Ok(());
            }
            match self.run_once(cancel).await {
                Ok(_) => {}
                Err(err) if err.is_cancelled() => break Ok(()),
                Err(err) if err.is_transient() => {
                    warn!(error = %err, "transient ingestion failure, retrying");
                    pause(self.settings.retry_backoff(), cancel).await;
                }
                Err(err) => break Err(err),
            }
        };
        if !self.outbox.is_empty() {
            warn!(pending = self.outbox.len(), "stopping with undelivered trade events");
        }
        self.consumer.close();
        result
    }
}
