//! Market data error types

use persistence::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid price {price} for {symbol}: must be positive")]
    InvalidPrice { symbol: String, price: String },
}

impl MarketDataError {
    /// Whether the failed call may succeed on the next attempt
    pub fn is_transient(&self) -> bool {
        match self {
            MarketDataError::Store(err) => err.is_transient(),
            MarketDataError::InvalidPrice { .. } => false,
        }
    }
}
