//! Exchange service
//!
//! Hosts the long-running pipelines of the exchange core around a shared
//! store and price cache:
//!
//! ```text
//!  OrderPublisher ──► [orders] ──► OrderIngestion ──► MatchingEngine ──► Store
//!                                        │
//!                                        ▼
//!                                    [trades] ──► TradePropagation ──► MarketDataState
//!                                                        │
//!                                                        ▼
//!                                                 BroadcastHub (market-{symbol})
//!                                                        ▲
//!  [binance-trades] ──► FeedIngestion ──► MarketDataState ┘
//! ```
//!
//! Each pipeline runs on a dedicated thread under a supervisor that restarts
//! it after fatal errors until shutdown.

pub mod app;
pub mod error;
pub mod feed;
pub mod host;
pub mod ingestion;
pub mod logging;
pub mod propagation;
pub mod publisher;
pub mod seed;
pub mod settings;

pub use app::Exchange;
pub use error::PipelineError;
pub use feed::{FeedIngestion, FeedSummary};
pub use host::{spawn_supervised, supervise, Backoff, Pipeline};
pub use ingestion::{IngestionSummary, OrderIngestion};
pub use propagation::{PropagationSummary, TradePropagation};
pub use publisher::{OrderPublisher, OrderRequest};
pub use settings::{ConfigError, ExchangeConfig, FeedSettings, InstrumentSeed};

pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");
