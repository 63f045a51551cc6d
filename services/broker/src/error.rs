//! Broker error taxonomy

use thiserror::Error;

/// A single failed delivery
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("produce to {topic} failed for key {key:?}: {reason}")]
pub struct DeliveryError {
    pub topic: String,
    pub key: String,
    pub reason: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrokerError {
    /// The broker could not be reached or refused the request
    #[error("Broker transport error: {0}")]
    Transport(String),

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Broker handle closed")]
    Closed,

    #[error("Operation cancelled")]
    Cancelled,

    /// One or more deliveries of a batch failed; carries at most the first
    /// ten underlying errors. `positions` lists every failed message by its
    /// index in the submitted batch, ascending.
    #[error("{count} produce(s) failed; first {} errors: {}", .errors.len(), join(.errors))]
    DeliveryFailed {
        count: usize,
        errors: Vec<DeliveryError>,
        positions: Vec<usize>,
    },

    /// The flush timeout elapsed before every delivery was acknowledged.
    /// The outcome of the missing deliveries is unknown, not failed.
    /// Failures reported before the timeout are carried along.
    #[error(
        "Flush incomplete: received {received} of {expected} delivery reports, {} failed: {}",
        .errors.len(),
        join(.errors)
    )]
    IncompleteFlush {
        received: usize,
        expected: usize,
        errors: Vec<DeliveryError>,
    },
}

impl BrokerError {
    /// Whether retrying at the next poll iteration may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrokerError::Transport(_)
                | BrokerError::DeliveryFailed { .. }
                | BrokerError::IncompleteFlush { .. }
        )
    }
}

fn join(errors: &[DeliveryError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_failed_display_lists_errors() {
        let err = BrokerError::DeliveryFailed {
            count: 2,
            errors: vec![
                DeliveryError {
                    topic: "trades".into(),
                    key: "AAPL".into(),
                    reason: "leader unavailable".into(),
                },
                DeliveryError {
                    topic: "trades".into(),
                    key: "MSFT".into(),
                    reason: "timed out".into(),
                },
            ],
            positions: vec![0, 3],
        };
        let text = err.to_string();
        assert!(text.starts_with("2 produce(s) failed"));
        assert!(text.contains("AAPL"));
        assert!(text.contains("timed out"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(BrokerError::Transport("down".into()).is_transient());
        assert!(BrokerError::IncompleteFlush {
            received: 1,
            expected: 2,
            errors: vec![]
        }
        .is_transient());
        assert!(!BrokerError::Cancelled.is_transient());
        assert!(!BrokerError::Closed.is_transient());
    }
}
