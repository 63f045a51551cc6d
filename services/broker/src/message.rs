//! Broker message types

use chrono::{DateTime, Utc};

/// A message to publish: routing key plus opaque payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub key: String,
    pub payload: Vec<u8>,
}

impl OutboundMessage {
    pub fn new(key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            payload,
        }
    }
}

/// A message read back from a partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of a single consume call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Polled {
    Record(Record),
    /// The consumer caught up with the end of a partition
    PartitionEof {
        topic: String,
        partition: u32,
        offset: u64,
    },
}

/// Successful delivery of one produced message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
}
