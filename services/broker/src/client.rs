//! Consumer and producer abstractions over a partitioned log

use crate::error::{BrokerError, DeliveryError};
use crate::message::{DeliveryReport, OutboundMessage, Polled};
use async_trait::async_trait;
use std::time::Duration;

/// Called exactly once per produced message with its delivery outcome
pub type DeliveryCallback = Box<dyn FnOnce(Result<DeliveryReport, DeliveryError>) + Send>;

/// Reading side of the log, bound to one consumer group
///
/// Offsets are only advanced by an explicit [`commit`](Consumer::commit),
/// which gives at-least-once delivery to the caller.
#[async_trait]
pub trait Consumer: Send {
    /// Wait up to `timeout` for the next record or end-of-partition event.
    /// Returns `None` when the timeout elapses first.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Polled>, BrokerError>;

    /// Commit the position of every record returned so far
    fn commit(&mut self) -> Result<(), BrokerError>;

    /// Rewind to the committed offsets so uncommitted records are redelivered
    fn seek_to_committed(&mut self) -> Result<(), BrokerError>;

    /// Release the handle; later calls fail with [`BrokerError::Closed`]
    fn close(&mut self);
}

/// Writing side of the log
#[async_trait]
pub trait Producer: Send + Sync {
    /// Enqueue a message. The outcome is reported through `on_delivery`
    /// while the producer is flushed.
    fn send(
        &self,
        topic: &str,
        message: OutboundMessage,
        on_delivery: DeliveryCallback,
    ) -> Result<(), BrokerError>;

    /// Serve pending deliveries for at most `timeout`.
    /// Returns the number of messages still in flight.
    async fn flush(&self, timeout: Duration) -> Result<usize, BrokerError>;
}
