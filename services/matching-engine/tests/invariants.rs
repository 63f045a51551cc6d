//! Property tests over random order streams

use chrono::{Duration, TimeZone, Utc};
use market_data::MarketDataState;
use matching_engine::MatchingEngine;
use persistence::{MemoryStore, Mutation, Store, WriteBatch};
use proptest::prelude::*;
use std::sync::Arc;
use types::prelude::*;

#[derive(Debug, Clone)]
struct Submission {
    market: bool,
    buy: bool,
    quantity: i64,
    cents: i64,
}

fn submission() -> impl Strategy<Value = Submission> {
    (prop::bool::weighted(0.2), any::<bool>(), 1i64..20, 9_500i64..=10_500).prop_map(
        |(market, buy, quantity, cents)| Submission {
            market,
            buy,
            quantity,
            cents,
        },
    )
}

fn run(submissions: &[Submission]) -> (Arc<MemoryStore>, MatchingEngine, Vec<OrderId>) {
    let store = Arc::new(MemoryStore::new());
    let instrument = Instrument::new(
        store.allocate_instrument_id().unwrap(),
        "AAPL",
        "Apple Inc.",
        Price::from_cents(10_000),
        Price::from_cents(10_000),
        Utc::now(),
    )
    .unwrap();
    let mut batch = WriteBatch::new();
    batch.push(Mutation::UpsertInstrument(instrument));
    store.commit(batch).unwrap();

    let market_data = Arc::new(MarketDataState::new(store.clone()));
    let mut engine = MatchingEngine::new(store.clone(), market_data);
    let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

    let mut ids = Vec::new();
    for (i, s) in submissions.iter().enumerate() {
        let message = OrderMessage {
            order_id: 0,
            client_id: format!("client-{i}"),
            symbol: "AAPL".into(),
            order_type: if s.market { "Market" } else { "Limit" }.into(),
            side: if s.buy { "Buy" } else { "Sell" }.into(),
            quantity: s.quantity,
            price: Price::from_cents(s.cents),
            timestamp: start + Duration::milliseconds(i as i64),
            action: ACTION_NEW.into(),
        };
        let outcome = engine.process_new_order(&message).unwrap();
        let report = outcome.report().expect("every submission is accepted");
        ids.push(report.order.id);
    }
    (store, engine, ids)
}

proptest! {
    #[test]
    fn prop_fill_bound_and_status(submissions in prop::collection::vec(submission(), 1..60)) {
        let (store, _, ids) = run(&submissions);
        for id in ids {
            let order = store.order(id).unwrap().unwrap();
            prop_assert!(order.filled_quantity <= order.quantity);
            prop_assert!(order.check_invariant());
            prop_assert_eq!(order.status, OrderStatus::from_fill(order.filled_quantity, order.quantity));
        }
    }

    #[test]
    fn prop_trades_conserve_quantity(submissions in prop::collection::vec(submission(), 1..60)) {
        let (store, _, ids) = run(&submissions);
        for id in &ids {
            let order = store.order(*id).unwrap().unwrap();
            let traded: u64 = store.trades_for_order(*id).unwrap().iter().map(|t| t.quantity).sum();
            prop_assert_eq!(traded, order.filled_quantity);
        }

        let bought: u64 = store.all_trades().iter().map(|t| t.quantity).sum();
        let filled: u64 = ids
            .iter()
            .map(|id| store.order(*id).unwrap().unwrap().filled_quantity)
            .sum();
        prop_assert_eq!(filled, bought * 2);
        prop_assert!(store.all_trades().iter().all(|t| t.price.is_positive()));
    }

    #[test]
    fn prop_book_is_uncrossed(submissions in prop::collection::vec(submission(), 1..60)) {
        let (store, engine, _) = run(&submissions);
        let snapshot = engine.snapshot("AAPL", usize::MAX).unwrap().unwrap();

        if let (Some((bid, _)), Some((ask, _))) = (snapshot.bids.first(), snapshot.asks.first()) {
            prop_assert!(bid < ask);
        }
        if snapshot.market_bids > 0 {
            prop_assert!(snapshot.asks.is_empty() && snapshot.market_asks == 0);
        }
        if snapshot.market_asks > 0 {
            prop_assert!(snapshot.bids.is_empty() && snapshot.market_bids == 0);
        }

        let instrument = store.instrument_by_symbol("AAPL").unwrap().unwrap();
        let open = store.open_orders(instrument.id).unwrap();
        prop_assert_eq!(open.len(), engine.resting_order_count());
    }
}
