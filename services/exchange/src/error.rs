//! Pipeline error taxonomy

use broker::BrokerError;
use market_data::MarketDataError;
use matching_engine::EngineError;
use persistence::{RecoveryError, StoreError};
use thiserror::Error;
use types::errors::InstrumentError;
use types::ids::OrderId;

use crate::settings::ConfigError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Order events that the broker reported as not delivered
    #[error("Publishing orders {failed:?} failed: {source}")]
    Publish {
        failed: Vec<OrderId>,
        #[source]
        source: BrokerError,
    },

    #[error("Matching error: {0}")]
    Engine(#[from] EngineError),

    #[error("Market data error: {0}")]
    MarketData(#[from] MarketDataError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Store recovery failed: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("Invalid instrument: {0}")]
    Instrument(#[from] InstrumentError),

    #[error("Encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to start pipeline thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl PipelineError {
    /// Retried at the next poll iteration rather than stopping the pipeline
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Broker(err) | PipelineError::Publish { source: err, .. } => {
                err.is_transient()
            }
            PipelineError::Engine(err) => err.is_transient(),
            PipelineError::MarketData(err) => err.is_transient(),
            PipelineError::Store(err) => err.is_transient(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Broker(BrokerError::Cancelled))
    }
}
