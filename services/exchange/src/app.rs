//! Service wiring
//!
//! Owns the process-scoped state (store, broker, market data cache,
//! notification hub) and hands explicit handles to every pipeline.

use broker::{Cancellation, MemoryBroker};
use market_data::{BroadcastHub, MarketDataState};
use matching_engine::MatchingEngine;
use persistence::{open_durable_store, JournalConfig, MemoryStore, Store};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::info;

use crate::error::PipelineError;
use crate::feed::FeedIngestion;
use crate::host::{spawn_supervised, Backoff};
use crate::ingestion::OrderIngestion;
use crate::propagation::TradePropagation;
use crate::publisher::OrderPublisher;
use crate::seed::seed_instruments;
use crate::settings::ExchangeConfig;

pub struct Exchange {
    config: ExchangeConfig,
    store: Arc<dyn Store>,
    broker: MemoryBroker,
    market_data: Arc<MarketDataState>,
    hub: Arc<BroadcastHub>,
    cancel: Cancellation,
}

impl Exchange {
    /// Open the store (replaying the journal when one is configured), create
    /// the topics, seed instruments and warm the price cache.
    pub fn open(config: ExchangeConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let store: Arc<dyn Store> = match &config.store.journal_dir {
            Some(dir) => {
                let mut journal = JournalConfig::new(dir);
                journal.fsync_policy = config.store.fsync;
                journal.segment_bytes = config.store.segment_bytes;
                let (store, report) = open_durable_store(journal)?;
                info!(replayed = report.replayed, dir = %dir.display(), "durable store opened");
                Arc::new(store)
            }
            None => Arc::new(MemoryStore::new()),
        };

        Self::with_store(config, store, MemoryBroker::new())
    }

    /// Wire the service around an existing store and broker
    pub fn with_store(
        config: ExchangeConfig,
        store: Arc<dyn Store>,
        broker: MemoryBroker,
    ) -> Result<Self, PipelineError> {
        broker.create_topic(&config.broker.orders_topic, config.broker.partitions);
        broker.create_topic(&config.broker.trades_topic, config.broker.partitions);
        broker.create_topic(&config.broker.feed_topic, config.broker.partitions);

        seed_instruments(&*store, &config.instruments)?;
        let market_data = Arc::new(MarketDataState::new(store.clone()));
        let warmed = market_data.warm_up()?;
        info!(instruments = warmed, "price cache warmed");

        let hub = Arc::new(BroadcastHub::new(config.propagation.notification_capacity));
        Ok(Self {
            config,
            store,
            broker,
            market_data,
            hub,
            cancel: Cancellation::new(),
        })
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn broker(&self) -> &MemoryBroker {
        &self.broker
    }

    pub fn market_data(&self) -> &Arc<MarketDataState> {
        &self.market_data
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancel
    }

    pub fn publisher(&self) -> OrderPublisher {
        OrderPublisher::new(
            Arc::new(self.broker.producer()),
            self.store.clone(),
            self.config.broker.orders_topic.clone(),
            self.config.ingestion.flush_timeout(),
        )
    }

    /// Fresh ingestion pipeline with its books rebuilt from the store
    pub fn ingestion(&self) -> Result<OrderIngestion, PipelineError> {
        build_ingestion(&self.config, &self.store, &self.market_data, &self.broker)
    }

    pub fn propagation(&self) -> Result<TradePropagation, PipelineError> {
        build_propagation(&self.config, &self.market_data, &self.hub, &self.broker)
    }

    pub fn feed(&self) -> Result<FeedIngestion, PipelineError> {
        build_feed(&self.config, &self.store, &self.market_data, &self.hub, &self.broker)
    }

    /// Start every pipeline on its own supervised thread; the feed only
    /// when it is enabled
    pub fn start(&self) -> Result<Vec<JoinHandle<()>>, PipelineError> {
        let backoff = Backoff::new(
            Duration::from_millis(self.config.host.restart_backoff_ms),
            Duration::from_millis(self.config.host.max_restart_backoff_ms),
        );

        let ingestion = {
            let (config, store, market_data, broker) = (
                self.config.clone(),
                self.store.clone(),
                self.market_data.clone(),
                self.broker.clone(),
            );
            spawn_supervised(
                "order-ingestion",
                move || build_ingestion(&config, &store, &market_data, &broker),
                self.cancel.clone(),
                backoff,
            )?
        };

        let propagation = {
            let (config, market_data, hub, broker) = (
                self.config.clone(),
                self.market_data.clone(),
                self.hub.clone(),
                self.broker.clone(),
            );
            spawn_supervised(
                "trade-propagation",
                move || build_propagation(&config, &market_data, &hub, &broker),
                self.cancel.clone(),
                backoff,
            )?
        };

        let mut handles = vec![ingestion, propagation];
        if self.config.feed.enabled {
            let (config, store, market_data, hub, broker) = (
                self.config.clone(),
                self.store.clone(),
                self.market_data.clone(),
                self.hub.clone(),
                self.broker.clone(),
            );
            handles.push(spawn_supervised(
                "feed-ingestion",
                move || build_feed(&config, &store, &market_data, &hub, &broker),
                self.cancel.clone(),
                backoff,
            )?);
        }

        info!(pipelines = handles.len(), "pipelines started");
        Ok(handles)
    }

    /// Signal every pipeline to stop
    pub fn shutdown(&self) {
        info!("shutdown requested");
        self.cancel.cancel();
    }
}

fn build_ingestion(
    config: &ExchangeConfig,
    store: &Arc<dyn Store>,
    market_data: &Arc<MarketDataState>,
    broker: &MemoryBroker,
) -> Result<OrderIngestion, PipelineError> {
    let mut engine = MatchingEngine::new(store.clone(), market_data.clone());
    engine.recover()?;
    let consumer = broker.consumer(&config.broker.ingestion_group, &config.broker.orders_topic)?;
    Ok(OrderIngestion::new(
        Box::new(consumer),
        Arc::new(broker.producer()),
        engine,
        config.broker.trades_topic.clone(),
        config.ingestion.clone(),
    ))
}

fn build_propagation(
    config: &ExchangeConfig,
    market_data: &Arc<MarketDataState>,
    hub: &Arc<BroadcastHub>,
    broker: &MemoryBroker,
) -> Result<TradePropagation, PipelineError> {
    let consumer = broker.consumer(&config.broker.propagation_group, &config.broker.trades_topic)?;
    Ok(TradePropagation::new(
        Box::new(consumer),
        market_data.clone(),
        hub.clone(),
        config.propagation.clone(),
    ))
}

fn build_feed(
    config: &ExchangeConfig,
    store: &Arc<dyn Store>,
    market_data: &Arc<MarketDataState>,
    hub: &Arc<BroadcastHub>,
    broker: &MemoryBroker,
) -> Result<FeedIngestion, PipelineError> {
    let consumer = broker.consumer(&config.broker.feed_group, &config.broker.feed_topic)?;
    Ok(FeedIngestion::new(
        Box::new(consumer),
        store.clone(),
        market_data.clone(),
        hub.clone(),
        config.feed.clone(),
    ))
}
