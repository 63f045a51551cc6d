//! In-process partitioned log broker
//!
//! Topics hold a fixed number of append-only partitions; records are routed
//! by a hash of their key so one key always lands on one partition. Consumer
//! groups keep committed offsets per partition, and a group's consumer starts
//! from those offsets. One consumer per group and topic is assumed (no
//! rebalancing).
//!
//! Faults can be injected for testing: failing selected deliveries, holding
//! every delivery back, and failing polls or sends with transport errors.

use crate::client::{Consumer, DeliveryCallback, Producer};
use crate::error::{BrokerError, DeliveryError};
use crate::message::{DeliveryReport, OutboundMessage, Polled, Record};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

type DeliveryFilter = Box<dyn Fn(&str, &OutboundMessage) -> bool + Send + Sync>;

struct Topic {
    partitions: Vec<Vec<Record>>,
    /// Committed next-offset per partition, by consumer group
    committed: HashMap<String, Vec<u64>>,
}

#[derive(Default)]
struct Faults {
    fail_delivery: Option<DeliveryFilter>,
    hold_deliveries: bool,
    failing_polls: usize,
    failing_sends: usize,
}

#[derive(Default)]
struct Inner {
    topics: Mutex<HashMap<String, Topic>>,
    faults: Mutex<Faults>,
    appended: Notify,
}

/// Shared handle to an in-process broker
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a topic; a no-op when it already exists
    pub fn create_topic(&self, name: &str, partitions: u32) {
        let mut topics = self.inner.topics.lock();
        topics.entry(name.to_string()).or_insert_with(|| Topic {
            partitions: vec![Vec::new(); partitions.max(1) as usize],
            committed: HashMap::new(),
        });
    }

    pub fn consumer(&self, group: &str, topic: &str) -> Result<MemoryConsumer, BrokerError> {
        let topics = self.inner.topics.lock();
        let state = topics
            .get(topic)
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;
        let positions = state
            .committed
            .get(group)
            .cloned()
            .unwrap_or_else(|| vec![0; state.partitions.len()]);

        Ok(MemoryConsumer {
            broker: self.clone(),
            group: group.to_string(),
            topic: topic.to_string(),
            eof_reported: vec![false; positions.len()],
            positions,
            next_partition: 0,
            closed: false,
        })
    }

    pub fn producer(&self) -> MemoryProducer {
        MemoryProducer {
            broker: self.clone(),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Append directly, bypassing producers and faults
    pub fn append_many(&self, topic: &str, messages: Vec<OutboundMessage>) {
        for message in messages {
            // unknown topics are silently skipped here; tests create them first
            let _ = self.append(topic, message);
        }
    }

    /// Every record of a topic, partition by partition
    pub fn records(&self, topic: &str) -> Vec<Record> {
        self.inner
            .topics
            .lock()
            .get(topic)
            .map(|t| t.partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Committed next-offsets of a group, one per partition
    pub fn committed(&self, group: &str, topic: &str) -> Option<Vec<u64>> {
        self.inner
            .topics
            .lock()
            .get(topic)
            .and_then(|t| t.committed.get(group).cloned())
    }

    /// Fail every delivery for which `filter(topic, message)` holds
    pub fn fail_deliveries<F>(&self, filter: F)
    where
        F: Fn(&str, &OutboundMessage) -> bool + Send + Sync + 'static,
    {
        self.inner.faults.lock().fail_delivery = Some(Box::new(filter));
    }

    pub fn clear_delivery_failures(&self) {
        self.inner.faults.lock().fail_delivery = None;
    }

    /// While held, flushes make no progress and deliveries stay in flight
    pub fn hold_deliveries(&self, hold: bool) {
        self.inner.faults.lock().hold_deliveries = hold;
    }

    /// Fail the next `count` polls across all consumers with a transport error
    pub fn fail_next_polls(&self, count: usize) {
        self.inner.faults.lock().failing_polls = count;
    }

    /// Fail the next `count` sends across all producers with a transport error
    pub fn fail_next_sends(&self, count: usize) {
        self.inner.faults.lock().failing_sends = count;
    }

    fn append(&self, topic: &str, message: OutboundMessage) -> Result<DeliveryReport, String> {
        let report = {
            let mut topics = self.inner.topics.lock();
            let state = topics
                .get_mut(topic)
                .ok_or_else(|| format!("unknown topic or partition {topic}"))?;
            let partition = partition_for(&message.key, state.partitions.len());
            let log = &mut state.partitions[partition];
            let offset = log.len() as u64;
            log.push(Record {
                topic: topic.to_string(),
                partition: partition as u32,
                offset,
                key: message.key.clone(),
                payload: message.payload,
                timestamp: Utc::now(),
            });
            DeliveryReport {
                topic: topic.to_string(),
                partition: partition as u32,
                offset,
                key: message.key,
            }
        };
        self.inner.appended.notify_waiters();
        Ok(report)
    }

    fn take_fault(counter: &mut usize) -> bool {
        if *counter > 0 {
            *counter -= 1;
            true
        } else {
            false
        }
    }
}

fn partition_for(key: &str, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions as u64) as usize
}

/// Consumer bound to one group and one topic
pub struct MemoryConsumer {
    broker: MemoryBroker,
    group: String,
    topic: String,
    /// Next offset to read, per partition
    positions: Vec<u64>,
    eof_reported: Vec<bool>,
    next_partition: usize,
    closed: bool,
}

impl MemoryConsumer {
    fn try_next(&mut self) -> Option<Polled> {
        let topics = self.broker.inner.topics.lock();
        let state = topics.get(&self.topic)?;
        let count = self.positions.len();

        // round-robin over partitions so none starves
        for step in 0..count {
            let partition = (self.next_partition + step) % count;
            let position = self.positions[partition];
            if let Some(record) = state.partitions[partition].get(position as usize) {
                self.positions[partition] = position + 1;
                self.eof_reported[partition] = false;
                self.next_partition = (partition + 1) % count;
                return Some(Polled::Record(record.clone()));
            }
        }

        for partition in 0..count {
            if !self.eof_reported[partition] {
                self.eof_reported[partition] = true;
                return Some(Polled::PartitionEof {
                    topic: self.topic.clone(),
                    partition: partition as u32,
                    offset: self.positions[partition],
                });
            }
        }
        None
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Polled>, BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        if MemoryBroker::take_fault(&mut self.broker.inner.faults.lock().failing_polls) {
            return Err(BrokerError::Transport("injected poll failure".into()));
        }

        let deadline = Instant::now() + timeout;
        let inner = Arc::clone(&self.broker.inner);
        loop {
            let appended = inner.appended.notified();
            tokio::pin!(appended);
            // register before checking so an append in between is not missed
            appended.as_mut().enable();

            if let Some(polled) = self.try_next() {
                return Ok(Some(polled));
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(None);
            }
        }
    }

    fn commit(&mut self) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        let mut topics = self.broker.inner.topics.lock();
        let state = topics
            .get_mut(&self.topic)
            .ok_or_else(|| BrokerError::UnknownTopic(self.topic.clone()))?;
        state
            .committed
            .insert(self.group.clone(), self.positions.clone());
        debug!(group = %self.group, topic = %self.topic, positions = ?self.positions, "offsets committed");
        Ok(())
    }

    fn seek_to_committed(&mut self) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        let topics = self.broker.inner.topics.lock();
        let state = topics
            .get(&self.topic)
            .ok_or_else(|| BrokerError::UnknownTopic(self.topic.clone()))?;
        self.positions = state
            .committed
            .get(&self.group)
            .cloned()
            .unwrap_or_else(|| vec![0; state.partitions.len()]);
        self.eof_reported = vec![false; self.positions.len()];
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

struct PendingDelivery {
    topic: String,
    message: OutboundMessage,
    on_delivery: DeliveryCallback,
}

/// Producer with a local queue served by `flush`
pub struct MemoryProducer {
    broker: MemoryBroker,
    pending: Mutex<VecDeque<PendingDelivery>>,
}

impl MemoryProducer {
    /// Deliver queued messages; returns how many are still in flight
    fn deliver_pending(&self) -> usize {
        let mut pending = self.pending.lock();
        if self.broker.inner.faults.lock().hold_deliveries {
            return pending.len();
        }

        while let Some(delivery) = pending.pop_front() {
            let injected = self
                .broker
                .inner
                .faults
                .lock()
                .fail_delivery
                .as_ref()
                .is_some_and(|fail| fail(&delivery.topic, &delivery.message));

            let outcome = if injected {
                Err(DeliveryError {
                    topic: delivery.topic.clone(),
                    key: delivery.message.key.clone(),
                    reason: "injected delivery failure".into(),
                })
            } else {
                let key = delivery.message.key.clone();
                self.broker
                    .append(&delivery.topic, delivery.message)
                    .map_err(|reason| DeliveryError {
                        topic: delivery.topic.clone(),
                        key,
                        reason,
                    })
            };
            (delivery.on_delivery)(outcome);
        }
        0
    }
}

#[async_trait]
impl Producer for MemoryProducer {
    fn send(
        &self,
        topic: &str,
        message: OutboundMessage,
        on_delivery: DeliveryCallback,
    ) -> Result<(), BrokerError> {
        if MemoryBroker::take_fault(&mut self.broker.inner.faults.lock().failing_sends) {
            return Err(BrokerError::Transport("injected send failure".into()));
        }
        self.pending.lock().push_back(PendingDelivery {
            topic: topic.to_string(),
            message,
            on_delivery,
        });
        Ok(())
    }

    async fn flush(&self, timeout: Duration) -> Result<usize, BrokerError> {
        let in_flight = self.deliver_pending();
        if in_flight > 0 {
            tokio::time::sleep(timeout).await;
        }
        Ok(in_flight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(key: &str, payload: &str) -> OutboundMessage {
        OutboundMessage::new(key, payload.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_same_key_same_partition() {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 4);
        broker.append_many(
            "orders",
            vec![message("AAPL", "1"), message("AAPL", "2"), message("AAPL", "3")],
        );

        let records = broker.records("orders");
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.partition == records[0].partition));
        let offsets: Vec<u64> = records.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_eof_reported_once_per_catch_up() {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 1);
        broker.append_many("orders", vec![message("AAPL", "1")]);
        let mut consumer = broker.consumer("g", "orders").unwrap();

        assert!(matches!(
            consumer.poll(Duration::from_millis(10)).await.unwrap(),
            Some(Polled::Record(_))
        ));
        assert!(matches!(
            consumer.poll(Duration::from_millis(10)).await.unwrap(),
            Some(Polled::PartitionEof { offset: 1, .. })
        ));
        assert_eq!(consumer.poll(Duration::from_millis(10)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_poll_wakes_on_append() {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 1);
        let mut consumer = broker.consumer("g", "orders").unwrap();
        // drain the initial EOF
        consumer.poll(Duration::from_millis(5)).await.unwrap();

        let writer = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.append_many("orders", vec![message("AAPL", "late")]);
        });

        let polled = consumer.poll(Duration::from_secs(2)).await.unwrap();
        match polled {
            Some(Polled::Record(record)) => assert_eq!(record.payload, b"late"),
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_uncommitted_records_are_redelivered() {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 1);
        broker.append_many("orders", vec![message("A", "1"), message("A", "2")]);

        let mut consumer = broker.consumer("g", "orders").unwrap();
        consumer.poll(Duration::from_millis(5)).await.unwrap();
        consumer.commit().unwrap();
        consumer.poll(Duration::from_millis(5)).await.unwrap();

        consumer.seek_to_committed().unwrap();
        match consumer.poll(Duration::from_millis(5)).await.unwrap() {
            Some(Polled::Record(record)) => assert_eq!(record.offset, 1),
            other => panic!("expected redelivery, got {other:?}"),
        }

        // a new consumer of the same group resumes from the commit
        let mut again = broker.consumer("g", "orders").unwrap();
        match again.poll(Duration::from_millis(5)).await.unwrap() {
            Some(Polled::Record(record)) => assert_eq!(record.offset, 1),
            other => panic!("expected resume, got {other:?}"),
        }
        assert_eq!(broker.committed("g", "orders"), Some(vec![1]));
    }

    #[tokio::test]
    async fn test_closed_consumer_rejects_calls() {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 1);
        let mut consumer = broker.consumer("g", "orders").unwrap();
        consumer.close();
        assert_eq!(
            consumer.poll(Duration::from_millis(5)).await,
            Err(BrokerError::Closed)
        );
        assert_eq!(consumer.commit(), Err(BrokerError::Closed));
    }

    #[tokio::test]
    async fn test_injected_poll_failure_is_transient() {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 1);
        broker.fail_next_polls(1);
        let mut consumer = broker.consumer("g", "orders").unwrap();

        let err = consumer.poll(Duration::from_millis(5)).await.unwrap_err();
        assert!(err.is_transient());
        assert!(consumer.poll(Duration::from_millis(5)).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_topic() {
        let broker = MemoryBroker::new();
        assert!(matches!(
            broker.consumer("g", "missing"),
            Err(BrokerError::UnknownTopic(_))
        ));
    }
}
