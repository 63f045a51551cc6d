//! Broker batch client
//!
//! Two primitives over a partitioned append-only log:
//! - [`consume_batch`]: time- and count-bounded batch consume
//! - [`produce_batch`]: delivery-tracked, timeout-bounded batch produce
//!
//! The log itself sits behind the [`Consumer`] and [`Producer`] traits.
//! [`MemoryBroker`] is an in-process implementation with consumer-group
//! offsets and fault injection.

pub mod batch;
pub mod cancel;
pub mod client;
pub mod error;
pub mod memory;
pub mod message;

pub use batch::{consume_batch, produce_batch, MAX_REPORTED_ERRORS};
pub use cancel::Cancellation;
pub use client::{Consumer, DeliveryCallback, Producer};
pub use error::{BrokerError, DeliveryError};
pub use memory::{MemoryBroker, MemoryConsumer, MemoryProducer};
pub use message::{DeliveryReport, OutboundMessage, Polled, Record};
