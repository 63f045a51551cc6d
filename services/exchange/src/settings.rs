//! Exchange configuration
//!
//! Layered: built-in defaults, then an optional `config/exchange.toml`, then
//! `EXCHANGE__`-prefixed environment variables
//! (e.g. `EXCHANGE__INGESTION__BATCH_SIZE=200`).

use ::config::{Config, Environment, File};
use persistence::FsyncPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use types::instrument::validate_symbol;
use types::numeric::Price;

pub const ENV_PREFIX: &str = "EXCHANGE";
pub const DEFAULT_CONFIG_FILE: &str = "config/exchange";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub broker: BrokerSettings,
    pub ingestion: IngestionSettings,
    pub propagation: PropagationSettings,
    pub feed: FeedSettings,
    pub store: StoreSettings,
    pub host: HostSettings,
    pub logging: LoggingSettings,
    /// Instruments inserted at startup when absent
    pub instruments: Vec<InstrumentSeed>,
}

/// Topic names and consumer groups
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub orders_topic: String,
    pub trades_topic: String,
    pub partitions: u32,
    pub ingestion_group: String,
    pub propagation_group: String,
    /// Trades reported by the external venue
    pub feed_topic: String,
    pub feed_group: String,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            orders_topic: "orders".to_string(),
            trades_topic: "trades".to_string(),
            partitions: 1,
            ingestion_group: "order-ingestion".to_string(),
            propagation_group: "stock-exchange-group".to_string(),
            feed_topic: "binance-trades".to_string(),
            feed_group: "binance-consumer-group".to_string(),
        }
    }
}

/// Order ingestion pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionSettings {
    pub batch_wait_ms: u64,
    pub batch_size: usize,
    /// Budget for publishing the trade events of one batch
    pub flush_timeout_ms: u64,
    /// Pause before retrying after a transient failure
    pub retry_backoff_ms: u64,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            batch_wait_ms: 100,
            batch_size: 500,
            flush_timeout_ms: 10_000,
            retry_backoff_ms: 500,
        }
    }
}

impl IngestionSettings {
    pub fn batch_wait(&self) -> Duration {
        Duration::from_millis(self.batch_wait_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Trade propagation pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationSettings {
    pub batch_wait_ms: u64,
    pub batch_size: usize,
    /// Recently seen trade ids kept for de-duplication
    pub dedup_window: usize,
    /// Buffered notifications per subscriber group
    pub notification_capacity: usize,
    pub retry_backoff_ms: u64,
}

impl Default for PropagationSettings {
    fn default() -> Self {
        Self {
            batch_wait_ms: 500,
            batch_size: 1000,
            dedup_window: market_data::dedup::DEFAULT_WINDOW,
            notification_capacity: market_data::notify::DEFAULT_CAPACITY,
            retry_backoff_ms: 500,
        }
    }
}

impl PropagationSettings {
    pub fn batch_wait(&self) -> Duration {
        Duration::from_millis(self.batch_wait_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// External trade feed pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    /// Whether `start` runs the feed pipeline
    pub enabled: bool,
    pub batch_wait_ms: u64,
    pub batch_size: usize,
    /// Recently seen venue trade ids kept for de-duplication
    pub dedup_window: usize,
    pub retry_backoff_ms: u64,
    /// Venue name carried by feed price notifications
    pub source: String,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_wait_ms: 1000,
            batch_size: 500,
            dedup_window: market_data::dedup::DEFAULT_WINDOW,
            retry_backoff_ms: 500,
            source: "Binance".to_string(),
        }
    }
}

impl FeedSettings {
    pub fn batch_wait(&self) -> Duration {
        Duration::from_millis(self.batch_wait_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Durable store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Journal directory; the store is memory-only without one
    pub journal_dir: Option<PathBuf>,
    pub fsync: FsyncPolicy,
    pub segment_bytes: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            journal_dir: None,
            fsync: FsyncPolicy::EveryWrite,
            segment_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Pipeline supervision
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    pub restart_backoff_ms: u64,
    pub max_restart_backoff_ms: u64,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            restart_backoff_ms: 1_000,
            max_restart_backoff_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSeed {
    pub symbol: String,
    pub name: String,
    pub current_price: Price,
    #[serde(default)]
    pub previous_price: Price,
}

impl InstrumentSeed {
    pub fn new(symbol: &str, name: &str, current_cents: i64, previous_cents: i64) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: name.to_string(),
            current_price: Price::from_cents(current_cents),
            previous_price: Price::from_cents(previous_cents),
        }
    }
}

/// Instruments available out of the box
pub fn default_instruments() -> Vec<InstrumentSeed> {
    vec![
        InstrumentSeed::new("AAPL", "Apple Inc.", 15_000, 14_850),
        InstrumentSeed::new("GOOGL", "Alphabet Inc.", 280_000, 275_000),
        InstrumentSeed::new("MSFT", "Microsoft Corporation", 30_000, 29_800),
        InstrumentSeed::new("TSLA", "Tesla Inc.", 80_000, 79_000),
        InstrumentSeed::new("AMZN", "Amazon.com Inc.", 320_000, 315_000),
        InstrumentSeed::new("BTCUSDT", "Bitcoin USDT", 0, 0),
    ]
}

impl ExchangeConfig {
    /// Load from `config/exchange.toml` (if present) and the environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE, ENV_PREFIX)
    }

    pub fn load_from(file: &str, env_prefix: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: ExchangeConfig = settings.try_deserialize()?;
        if config.instruments.is_empty() {
            config.instruments = default_instruments();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| Err(ConfigError::Invalid(reason));

        if self.broker.partitions == 0 {
            return invalid("broker.partitions must be at least 1".into());
        }
        let topics = [
            &self.broker.orders_topic,
            &self.broker.trades_topic,
            &self.broker.feed_topic,
        ];
        if topics.iter().collect::<HashSet<_>>().len() != topics.len() {
            return invalid("orders, trades and feed topics must differ".into());
        }
        if self.ingestion.batch_size == 0
            || self.propagation.batch_size == 0
            || self.feed.batch_size == 0
        {
            return invalid("batch sizes must be positive".into());
        }
        if self.ingestion.batch_wait_ms == 0
            || self.propagation.batch_wait_ms == 0
            || self.feed.batch_wait_ms == 0
        {
            return invalid("batch wait budgets must be non-zero".into());
        }
        if self.ingestion.flush_timeout_ms == 0 {
            return invalid("ingestion.flush_timeout_ms must be non-zero".into());
        }
        if self.propagation.dedup_window == 0
            || self.feed.dedup_window == 0
            || self.propagation.notification_capacity == 0
        {
            return invalid("dedup windows and notification capacity must be positive".into());
        }
        if self.host.restart_backoff_ms > self.host.max_restart_backoff_ms {
            return invalid("host.restart_backoff_ms exceeds host.max_restart_backoff_ms".into());
        }

        let mut seen = HashSet::new();
        for seed in &self.instruments {
            if let Err(err) = validate_symbol(&seed.symbol) {
                return invalid(err.to_string());
            }
            if seed.current_price < Price::ZERO || seed.previous_price < Price::ZERO {
                return invalid(format!("negative seed price for {}", seed.symbol));
            }
            if !seen.insert(seed.symbol.as_str()) {
                return invalid(format!("duplicate instrument symbol {}", seed.symbol));
            }
        }
        Ok(())
    }
}
