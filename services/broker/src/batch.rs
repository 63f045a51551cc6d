//! Bounded batch consume and all-or-error batch produce

use crate::cancel::Cancellation;
use crate::client::{Consumer, Producer};
use crate::error::{BrokerError, DeliveryError};
use crate::message::{OutboundMessage, Polled, Record};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Delivery errors carried by [`BrokerError::DeliveryFailed`]
pub const MAX_REPORTED_ERRORS: usize = 10;

/// Slice of the flush budget spent per producer flush call
const FLUSH_SLICE: Duration = Duration::from_millis(100);

/// Collect up to `max_count` records, waiting at most `max_wait` in total
///
/// The deadline is fixed at entry and every poll only gets the budget that
/// remains. End-of-partition events are dropped and do not count. The batch
/// preserves delivery order. Nothing is committed: the caller commits once
/// the batch is durably processed.
///
/// On cancellation the records collected so far are discarded; they were not
/// committed and will be redelivered.
pub async fn consume_batch<C>(
    consumer: &mut C,
    max_wait: Duration,
    max_count: usize,
    cancel: &Cancellation,
) -> Result<Vec<Record>, BrokerError>
where
    C: Consumer + ?Sized,
{
    let deadline = Instant::now() + max_wait;
    let mut batch = Vec::with_capacity(max_count.min(1024));

    while batch.len() < max_count {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        if cancel.is_cancelled() {
            return Err(BrokerError::Cancelled);
        }

        let polled = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BrokerError::Cancelled),
            polled = consumer.poll(remaining) => polled?,
        };

        match polled {
            Some(Polled::Record(record)) => batch.push(record),
            Some(Polled::PartitionEof { topic, partition, offset }) => {
                debug!(%topic, partition, offset, "reached end of partition");
            }
            None => {}
        }
    }

    Ok(batch)
}

#[derive(Default)]
struct Tally {
    received: usize,
    errors: Vec<DeliveryError>,
    positions: Vec<usize>,
}

/// Publish every message and wait until each delivery is acknowledged
///
/// Flushes in short slices until all delivery callbacks have fired or
/// `flush_timeout` elapses. If the timeout elapses first the result is
/// [`BrokerError::IncompleteFlush`], carrying whatever failures were already
/// reported: the missing deliveries are unknown, and a retry is only safe
/// when consumers de-duplicate by natural key. Otherwise failed deliveries
/// are aggregated into one [`BrokerError::DeliveryFailed`] carrying at most
/// ten errors plus the batch position of every failed message.
///
/// Returns the number of messages delivered.
pub async fn produce_batch<P>(
    producer: &P,
    topic: &str,
    messages: Vec<OutboundMessage>,
    flush_timeout: Duration,
    cancel: &Cancellation,
) -> Result<usize, BrokerError>
where
    P: Producer + ?Sized,
{
    let expected = messages.len();
    if expected == 0 {
        return Ok(0);
    }

    let tally = Arc::new(Mutex::new(Tally::default()));
    for (position, message) in messages.into_iter().enumerate() {
        let tally = Arc::clone(&tally);
        producer.send(
            topic,
            message,
            Box::new(move |outcome| {
                let mut tally = tally.lock();
                tally.received += 1;
                if let Err(err) = outcome {
                    tally.positions.push(position);
                    if tally.errors.len() < MAX_REPORTED_ERRORS {
                        tally.errors.push(err);
                    }
                }
            }),
        )?;
    }

    let deadline = Instant::now() + flush_timeout;
    loop {
        if tally.lock().received >= expected {
            break;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        if cancel.is_cancelled() {
            return Err(BrokerError::Cancelled);
        }
        producer.flush(remaining.min(FLUSH_SLICE)).await?;
    }

    let mut tally = std::mem::take(&mut *tally.lock());
    if tally.received < expected {
        warn!(
            topic,
            received = tally.received,
            failed = tally.positions.len(),
            expected,
            "batch produce flush incomplete"
        );
        return Err(BrokerError::IncompleteFlush {
            received: tally.received,
            expected,
            errors: tally.errors,
        });
    }
    if !tally.positions.is_empty() {
        tally.positions.sort_unstable();
        warn!(topic, failed = tally.positions.len(), expected, "batch produce had failed deliveries");
        return Err(BrokerError::DeliveryFailed {
            count: tally.positions.len(),
            errors: tally.errors,
            positions: tally.positions,
        });
    }

    debug!(topic, delivered = expected, "batch produced");
    Ok(expected)
}
