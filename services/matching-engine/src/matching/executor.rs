//! Trade execution logic
//!
//! Resolves the execution price of a cross, builds the trade and both
//! orders' fill updates, and commits them to the store as one atomic unit.
//! Nothing in memory is touched: the caller swaps in the returned orders
//! only once the commit has succeeded.

use chrono::{DateTime, Utc};
use market_data::MarketDataError;
use persistence::{Mutation, Store, StoreError, WriteBatch};
use std::cmp::Ordering;
use thiserror::Error;
use tracing::debug;
use types::errors::{OrderError, TradeError};
use types::ids::InstrumentId;
use types::messages::TradeMessage;
use types::numeric::Price;
use types::order::{Order, Side};
use types::trade::Trade;

/// Match execution errors
#[derive(Debug, Error)]
pub enum MatchError {
    /// Market against market with no reference price for the instrument
    #[error("No reference price for instrument {0}")]
    NoReferencePrice(InstrumentId),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Trade error: {0}")]
    Trade(#[from] TradeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Reference price lookup failed: {0}")]
    MarketData(#[from] MarketDataError),
}

impl MatchError {
    /// Whether the step may succeed when retried
    pub fn is_transient(&self) -> bool {
        match self {
            MatchError::Store(err) => err.is_transient(),
            MatchError::MarketData(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// Execution price of a cross between `incoming` and `resting`
///
/// - market against limit: the limit side's price
/// - market against market: the reference price, `None` if there is none yet
/// - limit against limit: the earlier-created order's price, the resting
///   order's on equal creation times
pub fn resolve_price(incoming: &Order, resting: &Order, reference: Price) -> Option<Price> {
    match (incoming.is_market(), resting.is_market()) {
        (true, false) => Some(resting.price),
        (false, true) => Some(incoming.price),
        (true, true) => reference.is_positive().then_some(reference),
        (false, false) => match incoming.created_at.cmp(&resting.created_at) {
            Ordering::Less => Some(incoming.price),
            Ordering::Equal | Ordering::Greater => Some(resting.price),
        },
    }
}

/// Committed result of one cross
#[derive(Debug, Clone)]
pub struct Execution {
    pub trade: Trade,
    pub incoming: Order,
    pub resting: Order,
    /// Event for the `trades` topic
    pub event: TradeMessage,
}

/// Executes crosses for one instrument against the store
pub struct MatchExecutor<'a> {
    store: &'a dyn Store,
    symbol: &'a str,
}

impl<'a> MatchExecutor<'a> {
    pub fn new(store: &'a dyn Store, symbol: &'a str) -> Self {
        Self { store, symbol }
    }

    /// Execute a trade between an incoming and a resting order
    ///
    /// Trade quantity is the smaller of both remaining quantities. The trade
    /// insert and both order updates are committed in one batch; on failure
    /// nothing was applied and both orders are unchanged.
    pub fn execute(
        &self,
        incoming: &Order,
        resting: &Order,
        reference: Price,
        executed_at: DateTime<Utc>,
    ) -> Result<Execution, MatchError> {
        let price = resolve_price(incoming, resting, reference)
            .ok_or(MatchError::NoReferencePrice(incoming.instrument_id))?;
        let quantity = incoming.remaining().min(resting.remaining());

        let next_incoming = incoming.with_fill(quantity, price, executed_at)?;
        let next_resting = resting.with_fill(quantity, price, executed_at)?;

        let (buy, sell) = match incoming.side {
            Side::Buy => (incoming, resting),
            Side::Sell => (resting, incoming),
        };
        let trade = Trade::new(
            self.store.allocate_trade_id()?,
            buy.id,
            sell.id,
            incoming.instrument_id,
            quantity,
            price,
            executed_at,
        )?;

        let mut batch = WriteBatch::new();
        batch
            .push(Mutation::InsertTrade(trade.clone()))
            .push(Mutation::UpdateOrder(next_incoming.clone()))
            .push(Mutation::UpdateOrder(next_resting.clone()));
        self.store.commit(batch)?;

        debug!(
            trade_id = %trade.id,
            symbol = self.symbol,
            buy_order_id = %trade.buy_order_id,
            sell_order_id = %trade.sell_order_id,
            quantity,
            %price,
            "trade executed"
        );

        let event = TradeMessage::from_trade(
            &trade,
            self.symbol,
            buy.client_id.clone(),
            sell.client_id.clone(),
        );
        Ok(Execution {
            trade,
            incoming: next_incoming,
            resting: next_resting,
            event,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use persistence::{FlakyStore, MemoryStore};
    use std::sync::Arc;
    use types::prelude::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn order(id: u64, kind: OrderKind, side: Side, cents: i64, quantity: u64, secs: i64) -> Order {
        Order::new_pending(
            OrderId::new(id),
            format!("client-{id}"),
            InstrumentId::new(1),
            kind,
            side,
            quantity,
            Price::from_cents(cents),
            ts(secs),
        )
        .unwrap()
    }

    /// Store with instrument 1 and the given orders inserted
    fn store_with(orders: &[&Order]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let instrument = Instrument::new(
            store.allocate_instrument_id().unwrap(),
            "AAPL",
            "Apple Inc.",
            Price::from_cents(15_000),
            Price::ZERO,
            ts(0),
        )
        .unwrap();
        let mut batch = WriteBatch::new();
        batch.push(Mutation::UpsertInstrument(instrument));
        for order in orders {
            batch.push(Mutation::InsertOrder((*order).clone()));
        }
        store.commit(batch).unwrap();
        store
    }

    #[test]
    fn test_resolve_price_rules() {
        let market_buy = order(1, OrderKind::Market, Side::Buy, 0, 1, 5);
        let market_sell = order(2, OrderKind::Market, Side::Sell, 0, 1, 1);
        let early_sell = order(3, OrderKind::Limit, Side::Sell, 15_100, 1, 1);
        let late_buy = order(4, OrderKind::Limit, Side::Buy, 15_200, 1, 2);
        let reference = Price::from_cents(15_000);

        assert_eq!(resolve_price(&market_buy, &early_sell, reference), Some(Price::from_cents(15_100)));
        assert_eq!(resolve_price(&late_buy, &market_sell, reference), Some(Price::from_cents(15_200)));
        assert_eq!(resolve_price(&market_buy, &market_sell, reference), Some(reference));
        assert_eq!(resolve_price(&market_buy, &market_sell, Price::ZERO), None);
        // maker price: the earlier order
        assert_eq!(resolve_price(&late_buy, &early_sell, reference), Some(Price::from_cents(15_100)));
        assert_eq!(resolve_price(&early_sell, &late_buy, reference), Some(Price::from_cents(15_100)));
    }

    #[test]
    fn test_equal_creation_time_uses_resting_price() {
        let buy = order(1, OrderKind::Limit, Side::Buy, 15_200, 1, 3);
        let sell = order(2, OrderKind::Limit, Side::Sell, 15_100, 1, 3);
        assert_eq!(resolve_price(&buy, &sell, Price::ZERO), Some(Price::from_cents(15_100)));
        assert_eq!(resolve_price(&sell, &buy, Price::ZERO), Some(Price::from_cents(15_200)));
    }

    #[test]
    fn test_execute_partial_fill() {
        let sell = order(1, OrderKind::Limit, Side::Sell, 10_000, 10, 0);
        let buy = order(2, OrderKind::Limit, Side::Buy, 10_000, 4, 1);
        let store = store_with(&[&sell, &buy]);

        let execution = MatchExecutor::new(&*store, "AAPL")
            .execute(&buy, &sell, Price::ZERO, ts(2))
            .unwrap();

        assert_eq!(execution.trade.quantity, 4);
        assert_eq!(execution.trade.price, Price::from_cents(10_000));
        assert_eq!(execution.trade.buy_order_id, buy.id);
        assert_eq!(execution.incoming.status, OrderStatus::Filled);
        assert_eq!(execution.resting.status, OrderStatus::PartiallyFilled);
        assert_eq!(execution.resting.filled_quantity, 4);
        assert_eq!(execution.event.buyer_client_id, "client-2");
        assert_eq!(execution.event.seller_client_id, "client-1");
        assert_eq!(execution.event.symbol, "AAPL");

        let stored = store.order(sell.id).unwrap().unwrap();
        assert_eq!(stored.filled_quantity, 4);
        assert_eq!(store.trades_for_order(buy.id).unwrap().len(), 1);
    }

    #[test]
    fn test_market_against_market_without_reference_is_refused() {
        let sell = order(1, OrderKind::Market, Side::Sell, 0, 5, 0);
        let buy = order(2, OrderKind::Market, Side::Buy, 0, 5, 1);
        let store = store_with(&[&sell, &buy]);

        let err = MatchExecutor::new(&*store, "AAPL")
            .execute(&buy, &sell, Price::ZERO, ts(2))
            .unwrap_err();
        assert!(matches!(err, MatchError::NoReferencePrice(_)));
        assert!(!err.is_transient());
        assert_eq!(store.trade_count(), 0);
    }

    #[test]
    fn test_failed_commit_applies_nothing() {
        let sell = order(1, OrderKind::Limit, Side::Sell, 10_000, 10, 0);
        let buy = order(2, OrderKind::Limit, Side::Buy, 10_000, 10, 1);
        let inner = store_with(&[&sell, &buy]);
        let flaky = FlakyStore::new(inner.clone());
        flaky.fail_next_commits(1);

        let err = MatchExecutor::new(&flaky, "AAPL")
            .execute(&buy, &sell, Price::ZERO, ts(2))
            .unwrap_err();
        assert!(err.is_transient());

        assert_eq!(inner.trade_count(), 0);
        assert_eq!(inner.order(sell.id).unwrap().unwrap().filled_quantity, 0);
        assert_eq!(inner.order(buy.id).unwrap().unwrap().status, OrderStatus::Pending);
    }
}
