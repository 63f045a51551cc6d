//! Matching engine core
//!
//! Main coordinator for order books, matching logic and the durable store.
//! The engine is single-writer: one ingestion pipeline owns it and feeds it
//! order events strictly in arrival order, which serializes every matching
//! pass of an instrument.

use chrono::Utc;
use market_data::{MarketDataError, MarketDataState};
use persistence::{Mutation, Store, StoreError, WriteBatch};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use types::prelude::*;

use crate::book::{BookSnapshot, OrderBook};
use crate::events::{DropReason, MatchReport, OrderOutcome};
use crate::matching::{crossing, MatchError, MatchExecutor};

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Market data error: {0}")]
    MarketData(#[from] MarketDataError),

    /// A matching pass stopped part way. Trades committed before the
    /// failure are carried in `report` and still need publishing.
    #[error("Matching of order {order_id} interrupted: {source}")]
    Interrupted {
        order_id: OrderId,
        report: Box<MatchReport>,
        #[source]
        source: MatchError,
    },
}

impl EngineError {
    /// Whether redelivering the order event may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Store(err) => err.is_transient(),
            EngineError::MarketData(err) => err.is_transient(),
            EngineError::Interrupted { source, .. } => source.is_transient(),
        }
    }

    /// Trade events committed before the failure
    pub fn committed_events(&self) -> &[TradeMessage] {
        match self {
            EngineError::Interrupted { report, .. } => &report.events,
            _ => &[],
        }
    }
}

/// Main matching engine
pub struct MatchingEngine {
    store: Arc<dyn Store>,
    market_data: Arc<MarketDataState>,
    /// Order books per instrument
    books: HashMap<InstrumentId, OrderBook>,
}

impl MatchingEngine {
    pub fn new(store: Arc<dyn Store>, market_data: Arc<MarketDataState>) -> Self {
        Self {
            store,
            market_data,
            books: HashMap::new(),
        }
    }

    /// Rebuild every active instrument's book from the store's open orders.
    ///
    /// Returns the number of resting orders loaded.
    pub fn recover(&mut self) -> Result<usize, EngineError> {
        self.books.clear();
        let mut resting = 0;
        for instrument in self.store.active_instruments()? {
            let mut book = OrderBook::new(instrument.id);
            for order in self.store.open_orders(instrument.id)? {
                book.rest(order);
            }
            resting += book.order_count();
            self.books.insert(instrument.id, book);
        }
        info!(books = self.books.len(), resting, "order books recovered");
        Ok(resting)
    }

    /// Handle one order event from the `orders` topic.
    ///
    /// Unknown actions, malformed fields and unknown instruments drop the
    /// event without creating any state. A redelivered order id does not
    /// create a second order: if the stored order is still open its matching
    /// pass is re-run, otherwise the event is skipped.
    ///
    /// Errors leave every committed step in place; transient ones are worth
    /// redelivering.
    pub fn process_new_order(
        &mut self,
        message: &OrderMessage,
    ) -> Result<OrderOutcome, EngineError> {
        match message.action() {
            Ok(OrderAction::New) => {}
            Err(_) => {
                warn!(action = %message.action, order_id = message.order_id, "unknown order action ignored");
                return Ok(OrderOutcome::Ignored(DropReason::UnknownAction(
                    message.action.clone(),
                )));
            }
        }

        let new_order = match message.to_new_order() {
            Ok(new_order) => new_order,
            Err(err) => {
                warn!(error = %err, symbol = %message.symbol, "malformed order message dropped");
                return Ok(OrderOutcome::Rejected(DropReason::Malformed(err)));
            }
        };

        let Some(instrument) = self.store.instrument_by_symbol(&new_order.symbol)? else {
            warn!(symbol = %new_order.symbol, "order for unknown instrument dropped");
            return Ok(OrderOutcome::Rejected(DropReason::UnknownInstrument(
                new_order.symbol,
            )));
        };
        if !instrument.active {
            warn!(symbol = %instrument.symbol, "order for inactive instrument dropped");
            return Ok(OrderOutcome::Rejected(DropReason::InactiveInstrument(
                instrument.symbol,
            )));
        }

        if !new_order.order_id.is_unassigned() {
            if let Some(existing) = self.store.order(new_order.order_id)? {
                return self.redelivered(existing);
            }
        }

        let order_id = if new_order.order_id.is_unassigned() {
            self.store.allocate_order_id()?
        } else {
            new_order.order_id
        };
        let order = match Order::new_pending(
            order_id,
            new_order.client_id,
            instrument.id,
            new_order.kind,
            new_order.side,
            new_order.quantity,
            new_order.price,
            new_order.timestamp,
        ) {
            Ok(order) => order,
            Err(err) => {
                warn!(error = %err, %order_id, "invalid order dropped");
                return Ok(OrderOutcome::Rejected(DropReason::InvalidOrder(err)));
            }
        };

        let mut batch = WriteBatch::new();
        batch.push(Mutation::InsertOrder(order.clone()));
        self.store.commit(batch)?;
        debug!(
            %order_id,
            symbol = %instrument.symbol,
            side = %order.side,
            kind = %order.kind,
            quantity = order.quantity,
            price = %order.price,
            "order accepted"
        );

        let report = self.match_order(&instrument, order)?;
        Ok(OrderOutcome::Accepted(report))
    }

    fn redelivered(&mut self, existing: Order) -> Result<OrderOutcome, EngineError> {
        if !existing.is_open() {
            debug!(order_id = %existing.id, "duplicate order event skipped");
            return Ok(OrderOutcome::Duplicate(existing.id));
        }
        let Some(instrument) = self.store.instrument(existing.instrument_id)? else {
            return Ok(OrderOutcome::Duplicate(existing.id));
        };

        info!(order_id = %existing.id, filled = existing.filled_quantity, "resuming matching of redelivered order");
        if let Some(book) = self.books.get_mut(&instrument.id) {
            book.remove(&existing);
        }
        let report = self.match_order(&instrument, existing)?;
        Ok(OrderOutcome::Resumed(report))
    }

    /// Match a stored order against the resting orders of its instrument.
    ///
    /// Candidates are visited best first: for a buy, market sells then asks
    /// by ascending price; for a sell, market buys then bids by descending
    /// price; earlier orders first within a level. Whatever remains of the
    /// order rests on the book afterwards.
    pub fn match_order(
        &mut self,
        instrument: &Instrument,
        order: Order,
    ) -> Result<MatchReport, EngineError> {
        let book = self
            .books
            .entry(instrument.id)
            .or_insert_with(|| OrderBook::new(instrument.id));
        let executor = MatchExecutor::new(&*self.store, &instrument.symbol);

        let limit = (!order.is_market()).then_some(order.price);
        let candidates = book.opposite(order.side).candidates(limit);
        let resting_side = order.side.opposite();
        let mut report = MatchReport::new(order);

        for key in candidates {
            if !report.order.is_open() {
                break;
            }
            let Some(resting) = book.get(resting_side, &key).cloned() else {
                continue;
            };
            if !crossing::can_match(&report.order, &resting) {
                continue;
            }

            let result = if report.order.is_market() && resting.is_market() {
                self.market_data
                    .current_price(&instrument.symbol)
                    .map_err(MatchError::from)
                    .and_then(|reference| {
                        executor.execute(&report.order, &resting, reference, Utc::now())
                    })
            } else {
                executor.execute(&report.order, &resting, Price::ZERO, Utc::now())
            };

            match result {
                Ok(execution) => {
                    book.update(execution.resting);
                    report.order = execution.incoming;
                    report.trades.push(execution.trade);
                    report.events.push(execution.event);
                }
                Err(MatchError::NoReferencePrice(_)) => {
                    warn!(
                        symbol = %instrument.symbol,
                        order_id = %report.order.id,
                        resting_order_id = %resting.id,
                        "market against market cross skipped: no reference price"
                    );
                    report.skipped += 1;
                }
                Err(source) => {
                    // what was committed so far rests, so book and store agree
                    book.rest(report.order.clone());
                    return Err(EngineError::Interrupted {
                        order_id: report.order.id,
                        report: Box::new(report),
                        source,
                    });
                }
            }
        }

        book.rest(report.order.clone());
        if !report.trades.is_empty() {
            info!(
                order_id = %report.order.id,
                symbol = %instrument.symbol,
                trades = report.trades.len(),
                quantity = report.traded_quantity(),
                status = ?report.order.status,
                "order matched"
            );
        }
        Ok(report)
    }

    pub fn book(&self, instrument_id: InstrumentId) -> Option<&OrderBook> {
        self.books.get(&instrument_id)
    }

    /// Depth snapshot of a symbol's book
    pub fn snapshot(&self, symbol: &str, depth: usize) -> Result<Option<BookSnapshot>, EngineError> {
        let Some(instrument) = self.store.instrument_by_symbol(symbol)? else {
            return Ok(None);
        };
        Ok(self.books.get(&instrument.id).map(|book| book.snapshot(depth)))
    }

    /// Resting orders across every book
    pub fn resting_order_count(&self) -> usize {
        self.books.values().map(OrderBook::order_count).sum()
    }

    pub fn market_data(&self) -> &Arc<MarketDataState> {
        &self.market_data
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}
