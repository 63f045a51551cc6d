//! Market notifications
//!
//! Subscribers are grouped per instrument (`market-{symbol}`). Delivery is
//! fire-and-forget: publishing never fails, a group without subscribers
//! simply drops the event, and a subscriber that lags behind skips the
//! oldest events.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::trace;
use types::messages::TradeMessage;
use types::numeric::Price;

/// Default per-group channel capacity
pub const DEFAULT_CAPACITY: usize = 1024;

/// Subscriber group of an instrument
pub fn market_group(symbol: &str) -> String {
    format!("market-{symbol}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    pub symbol: String,
    pub price: Price,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated view of one propagated trade batch for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketUpdate {
    pub symbol: String,
    pub current_price: Price,
    pub trades: Vec<TradeMessage>,
    pub last_updated: DateTime<Utc>,
}

/// Price of a symbol as last traded on an external venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPriceUpdate {
    pub symbol: String,
    pub price: Price,
    pub volume: u64,
    /// Venue the price was reported by
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

/// Event pushed to a market group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum Notification {
    PriceUpdate(PriceUpdate),
    MarketUpdate(MarketUpdate),
    FeedPriceUpdate(FeedPriceUpdate),
    /// Snapshot sent to a subscriber as it joins
    CurrentPrice(PriceUpdate),
}

impl Notification {
    pub fn symbol(&self) -> &str {
        match self {
            Notification::PriceUpdate(update) | Notification::CurrentPrice(update) => {
                &update.symbol
            }
            Notification::MarketUpdate(update) => &update.symbol,
            Notification::FeedPriceUpdate(update) => &update.symbol,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Notification::PriceUpdate(_) => "PriceUpdate",
            Notification::MarketUpdate(_) => "MarketUpdate",
            Notification::FeedPriceUpdate(_) => "FeedPriceUpdate",
            Notification::CurrentPrice(_) => "CurrentPrice",
        }
    }
}

/// Publish side of the notification channel
pub trait NotificationSink: Send + Sync {
    /// Deliver `notification` to every subscriber of `group`
    fn publish(&self, group: &str, notification: Notification);
}

/// In-process notification hub backed by one broadcast channel per group
pub struct BroadcastHub {
    capacity: usize,
    groups: Mutex<HashMap<String, broadcast::Sender<Notification>>>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Join `group`; the receiver sees every event published after this call
    pub fn subscribe(&self, group: &str) -> broadcast::Receiver<Notification> {
        let mut groups = self.groups.lock();
        groups
            .entry(group.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Join the group of `symbol` and get the current price snapshot first
    pub fn join_market(
        &self,
        symbol: &str,
        current_price: Price,
    ) -> (PriceUpdate, broadcast::Receiver<Notification>) {
        let receiver = self.subscribe(&market_group(symbol));
        let snapshot = PriceUpdate {
            symbol: symbol.to_string(),
            price: current_price,
            timestamp: Utc::now(),
        };
        (snapshot, receiver)
    }

    pub fn subscriber_count(&self, group: &str) -> usize {
        self.groups
            .lock()
            .get(group)
            .map_or(0, |sender| sender.receiver_count())
    }
}

impl NotificationSink for BroadcastHub {
    fn publish(&self, group: &str, notification: Notification) {
        let mut groups = self.groups.lock();
        let Some(sender) = groups.get(group) else {
            trace!(group, event = notification.label(), "no subscribers");
            return;
        };
        if sender.send(notification).is_err() {
            // every receiver is gone
            groups.remove(group);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price_update(symbol: &str, cents: i64) -> Notification {
        Notification::PriceUpdate(PriceUpdate {
            symbol: symbol.to_string(),
            price: Price::from_cents(cents),
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_subscribers_receive_their_group_only() {
        let hub = BroadcastHub::default();
        let mut aapl = hub.subscribe(&market_group("AAPL"));
        let mut msft = hub.subscribe(&market_group("MSFT"));

        hub.publish(&market_group("AAPL"), price_update("AAPL", 15_100));

        let received = aapl.recv().await.unwrap();
        assert_eq!(received.symbol(), "AAPL");
        assert!(msft.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let hub = BroadcastHub::default();
        hub.publish("market-AAPL", price_update("AAPL", 15_100));

        let receiver = hub.subscribe("market-AAPL");
        drop(receiver);
        hub.publish("market-AAPL", price_update("AAPL", 15_200));
        assert_eq!(hub.subscriber_count("market-AAPL"), 0);
    }

    #[test]
    fn test_lagging_subscriber_skips_oldest() {
        let hub = BroadcastHub::new(2);
        let mut receiver = hub.subscribe("market-AAPL");
        for cents in [100, 200, 300] {
            hub.publish("market-AAPL", price_update("AAPL", cents));
        }

        assert!(matches!(
            receiver.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(1))
        ));
        match receiver.try_recv().unwrap() {
            Notification::PriceUpdate(update) => assert_eq!(update.price, Price::from_cents(200)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_join_market_returns_snapshot() {
        let hub = BroadcastHub::default();
        let (snapshot, _receiver) = hub.join_market("TSLA", Price::from_cents(80_000));
        assert_eq!(snapshot.symbol, "TSLA");
        assert_eq!(snapshot.price, Price::from_cents(80_000));
        assert_eq!(hub.subscriber_count("market-TSLA"), 1);
    }

    #[test]
    fn test_notification_wire_shape() {
        let json = serde_json::to_value(price_update("AAPL", 15_100)).unwrap();
        assert_eq!(json["event"], "PriceUpdate");
        assert_eq!(json["data"]["symbol"], "AAPL");
        assert_eq!(json["data"]["price"], "151.00");
    }

    #[test]
    fn test_feed_price_update_wire_shape() {
        let update = Notification::FeedPriceUpdate(FeedPriceUpdate {
            symbol: "BTCUSDT".into(),
            price: Price::from_cents(6_425_010),
            volume: 2,
            source: "Binance".into(),
            timestamp: Utc::now(),
        });
        assert_eq!(update.symbol(), "BTCUSDT");
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["event"], "FeedPriceUpdate");
        assert_eq!(json["data"]["source"], "Binance");
        assert_eq!(json["data"]["volume"], 2);
    }
}
