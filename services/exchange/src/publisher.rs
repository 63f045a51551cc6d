//! Order submission path
//!
//! Turns client order requests into `NEW` order events and publishes them
//! on the `orders` topic, keyed by symbol. Order ids are allocated up front
//! from the store sequence so redelivered events can be told apart from new
//! ones. Submission reports success once the events are durably published,
//! not once they are matched.

use broker::{produce_batch, BrokerError, Cancellation, OutboundMessage, Producer};
use chrono::Utc;
use persistence::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use types::ids::{ClientId, OrderId};
use types::messages::{OrderMessage, ACTION_NEW};
use types::numeric::Price;

use crate::error::PipelineError;

/// Client order request as received by the submission endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub client_id: ClientId,
    pub symbol: String,
    pub order_type: String,
    pub side: String,
    pub quantity: i64,
    #[serde(default)]
    pub price: Price,
}

pub struct OrderPublisher {
    producer: Arc<dyn Producer>,
    store: Arc<dyn Store>,
    topic: String,
    flush_timeout: Duration,
}

impl OrderPublisher {
    pub fn new(
        producer: Arc<dyn Producer>,
        store: Arc<dyn Store>,
        topic: impl Into<String>,
        flush_timeout: Duration,
    ) -> Self {
        Self {
            producer,
            store,
            topic: topic.into(),
            flush_timeout,
        }
    }

    /// Publish a batch of requests; returns the ids assigned, in request order.
    ///
    /// Delivery failures are surfaced as [`PipelineError::Publish`] naming
    /// the orders whose events were not delivered; a flush that runs out of
    /// time is [`BrokerError::IncompleteFlush`] and leaves delivery of the
    /// missing events unknown.
    pub async fn submit(
        &self,
        requests: Vec<OrderRequest>,
        cancel: &Cancellation,
    ) -> Result<Vec<OrderId>, PipelineError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut ids = Vec::with_capacity(requests.len());
        let mut messages = Vec::with_capacity(requests.len());
        for request in requests {
            let order_id = self.store.allocate_order_id()?;
            let message = OrderMessage {
                order_id: order_id.value(),
                client_id: request.client_id,
                symbol: request.symbol,
                order_type: request.order_type,
                side: request.side,
                quantity: request.quantity,
                price: request.price,
                timestamp: now,
                action: ACTION_NEW.to_string(),
            };
            messages.push(OutboundMessage::new(message.symbol.clone(), message.encode()?));
            ids.push(order_id);
        }

        let expected = messages.len();
        match produce_batch(&*self.producer, &self.topic, messages, self.flush_timeout, cancel).await {
            Ok(delivered) => {
                info!(delivered, topic = %self.topic, "orders published");
                Ok(ids)
            }
            Err(err @ BrokerError::IncompleteFlush { .. }) => {
                warn!(expected, error = %err, "order delivery unknown");
                Err(err.into())
            }
            Err(BrokerError::DeliveryFailed {
                count,
                errors,
                positions,
            }) => {
                let failed: Vec<OrderId> =
                    positions.iter().filter_map(|&i| ids.get(i).copied()).collect();
                warn!(expected, count, failed = ?failed, "order publish failed");
                Err(PipelineError::Publish {
                    failed,
                    source: BrokerError::DeliveryFailed {
                        count,
                        errors,
                        positions,
                    },
                })
            }
            Err(err) => {
                warn!(expected, error = %err, "order publish failed");
                Err(err.into())
            }
        }
    }

    pub async fn submit_one(
        &self,
        request: OrderRequest,
        cancel: &Cancellation,
    ) -> Result<OrderId, PipelineError> {
        let ids = self.submit(vec![request], cancel).await?;
        ids.into_iter()
            .next()
            .ok_or(PipelineError::Broker(BrokerError::IncompleteFlush {
                received: 0,
                expected: 1,
                errors: Vec::new(),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker::MemoryBroker;
    use persistence::MemoryStore;

    fn request(symbol: &str, side: &str) -> OrderRequest {
        OrderRequest {
            client_id: "client-1".into(),
            symbol: symbol.into(),
            order_type: "Limit".into(),
            side: side.into(),
            quantity: 10,
            price: Price::from_cents(15_100),
        }
    }

    fn publisher(broker: &MemoryBroker) -> OrderPublisher {
        OrderPublisher::new(
            Arc::new(broker.producer()),
            Arc::new(MemoryStore::new()),
            "orders",
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_submit_allocates_ids_and_keys_by_symbol() {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 1);
        let publisher = publisher(&broker);

        let ids = publisher
            .submit(vec![request("AAPL", "Sell"), request("MSFT", "Buy")], &Cancellation::new())
            .await
            .unwrap();
        assert_eq!(ids, vec![OrderId::new(1), OrderId::new(2)]);

        let records = broker.records("orders");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key, "AAPL");
        let message = OrderMessage::decode(&records[1].payload).unwrap();
        assert_eq!(message.order_id, 2);
        assert_eq!(message.action, ACTION_NEW);
        assert_eq!(message.side, "Buy");
    }

    #[tokio::test]
    async fn test_publish_failure_is_surfaced() {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 1);
        broker.fail_deliveries(|_, message| message.key == "MSFT");
        let publisher = publisher(&broker);

        let err = publisher
            .submit(vec![request("AAPL", "Sell"), request("MSFT", "Buy")], &Cancellation::new())
            .await
            .unwrap_err();
        match err {
            PipelineError::Publish { failed, source } => {
                assert_eq!(failed, vec![OrderId::new(2)]);
                assert!(matches!(source, BrokerError::DeliveryFailed { count: 1, .. }));
            }
            other => panic!("expected publish failure, got {other:?}"),
        }
        assert_eq!(broker.records("orders").len(), 1);
    }

    #[tokio::test]
    async fn test_failed_orders_are_named_when_they_share_a_symbol() {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 1);
        broker.fail_deliveries(|_, message| {
            OrderMessage::decode(&message.payload).map_or(false, |order| order.side == "Buy")
        });
        let publisher = publisher(&broker);

        let requests = vec![
            request("AAPL", "Sell"),
            request("AAPL", "Buy"),
            request("AAPL", "Sell"),
            request("AAPL", "Buy"),
        ];
        let err = publisher.submit(requests, &Cancellation::new()).await.unwrap_err();
        match err {
            PipelineError::Publish { failed, .. } => {
                assert_eq!(failed, vec![OrderId::new(2), OrderId::new(4)]);
            }
            other => panic!("expected publish failure, got {other:?}"),
        }
    }

    #[test]
    fn test_request_parses_camel_case() {
        let request: OrderRequest = serde_json::from_str(
            r#"{"clientId":"c1","symbol":"AAPL","orderType":"Market","side":"Buy","quantity":3}"#,
        )
        .unwrap();
        assert_eq!(request.price, Price::ZERO);
        assert_eq!(request.order_type, "Market");
    }
}
