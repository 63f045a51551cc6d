//! Durable store contract and its in-memory implementation
//!
//! All writes go through [`Store::commit`] with a [`WriteBatch`], the single
//! read-modify-write unit of the exchange: a batch is validated as a whole
//! and either every mutation becomes visible or none does. When a journal is
//! attached, the batch is appended to it before it is applied.

use crate::journal::{JournalError, JournalWriter, RecordKind};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, warn};
use types::prelude::*;

/// Ids reserved per journal record when a journal is attached
const ID_BLOCK: u64 = 1_000;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The batch violates a data-model invariant; nothing was applied
    #[error("Invalid write: {0}")]
    Invalid(String),

    #[error("Unknown instrument {0}")]
    UnknownInstrument(InstrumentId),

    #[error("Unknown order {0}")]
    UnknownOrder(OrderId),

    #[error("Duplicate {entity} id {id}")]
    Duplicate { entity: &'static str, id: u64 },

    /// The store could not be reached; retrying later may succeed
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl StoreError {
    /// Transient failures leave the caller free to retry the same work
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Journal(_))
    }
}

/// One change inside a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    UpsertInstrument(Instrument),
    InsertOrder(Order),
    UpdateOrder(Order),
    InsertTrade(Trade),
    InsertMarketData(MarketDataPoint),
    /// Trade reported by the external feed, keyed by its venue trade id
    InsertFeedTrade(FeedTrade),
}

/// Atomic unit of work
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    pub mutations: Vec<Mutation>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mutation: Mutation) -> &mut Self {
        self.mutations.push(mutation);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }
}

/// Entity kinds with their own id sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sequence {
    Instrument,
    Order,
    Trade,
    MarketData,
}

/// Journal payload recording that ids up to `ceiling` (exclusive) may be handed out
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IdReservation {
    pub sequence: Sequence,
    pub ceiling: u64,
}

/// Repository-style contract over instruments, orders, trades and market data
pub trait Store: Send + Sync {
    fn instrument(&self, id: InstrumentId) -> Result<Option<Instrument>, StoreError>;

    fn instrument_by_symbol(&self, symbol: &str) -> Result<Option<Instrument>, StoreError>;

    fn active_instruments(&self) -> Result<Vec<Instrument>, StoreError>;

    fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Pending or partially filled orders with quantity left, oldest first
    fn open_orders(&self, instrument_id: InstrumentId) -> Result<Vec<Order>, StoreError>;

    fn trades_for_order(&self, order_id: OrderId) -> Result<Vec<Trade>, StoreError>;

    /// Ticks with `from <= timestamp <= to`, ascending by timestamp
    fn market_data(
        &self,
        instrument_id: InstrumentId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MarketDataPoint>, StoreError>;

    fn latest_market_data(
        &self,
        instrument_id: InstrumentId,
    ) -> Result<Option<MarketDataPoint>, StoreError>;

    fn feed_trade(&self, trade_id: u64) -> Result<Option<FeedTrade>, StoreError>;

    /// Hand out the next id of a sequence. Ids are never reused, even when
    /// the batch that was meant to carry them fails.
    fn allocate(&self, sequence: Sequence) -> Result<u64, StoreError>;

    /// Validate and apply a batch atomically
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    fn allocate_order_id(&self) -> Result<OrderId, StoreError> {
        self.allocate(Sequence::Order).map(OrderId::new)
    }

    fn allocate_trade_id(&self) -> Result<TradeId, StoreError> {
        self.allocate(Sequence::Trade).map(TradeId::new)
    }

    fn allocate_market_data_id(&self) -> Result<MarketDataId, StoreError> {
        self.allocate(Sequence::MarketData).map(MarketDataId::new)
    }

    fn allocate_instrument_id(&self) -> Result<InstrumentId, StoreError> {
        self.allocate(Sequence::Instrument).map(InstrumentId::new)
    }
}

/// Shared handles delegate to the store they point at
impl<S: Store + ?Sized> Store for std::sync::Arc<S> {
    fn instrument(&self, id: InstrumentId) -> Result<Option<Instrument>, StoreError> {
        (**self).instrument(id)
    }

    fn instrument_by_symbol(&self, symbol: &str) -> Result<Option<Instrument>, StoreError> {
        (**self).instrument_by_symbol(symbol)
    }

    fn active_instruments(&self) -> Result<Vec<Instrument>, StoreError> {
        (**self).active_instruments()
    }

    fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        (**self).order(id)
    }

    fn open_orders(&self, instrument_id: InstrumentId) -> Result<Vec<Order>, StoreError> {
        (**self).open_orders(instrument_id)
    }

    fn trades_for_order(&self, order_id: OrderId) -> Result<Vec<Trade>, StoreError> {
        (**self).trades_for_order(order_id)
    }

    fn market_data(
        &self,
        instrument_id: InstrumentId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MarketDataPoint>, StoreError> {
        (**self).market_data(instrument_id, from, to)
    }

    fn latest_market_data(
        &self,
        instrument_id: InstrumentId,
    ) -> Result<Option<MarketDataPoint>, StoreError> {
        (**self).latest_market_data(instrument_id)
    }

    fn feed_trade(&self, trade_id: u64) -> Result<Option<FeedTrade>, StoreError> {
        (**self).feed_trade(trade_id)
    }

    fn allocate(&self, sequence: Sequence) -> Result<u64, StoreError> {
        (**self).allocate(sequence)
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        (**self).commit(batch)
    }
}

#[derive(Debug, Default)]
struct State {
    instruments: BTreeMap<InstrumentId, Instrument>,
    symbols: HashMap<String, InstrumentId>,
    orders: BTreeMap<OrderId, Order>,
    trades: BTreeMap<TradeId, Trade>,
    trades_by_order: HashMap<OrderId, Vec<TradeId>>,
    market_data: HashMap<InstrumentId, Vec<MarketDataPoint>>,
    market_data_ids: std::collections::HashSet<MarketDataId>,
    feed_trades: BTreeMap<u64, FeedTrade>,
}

/// Per-sequence allocation cursor
#[derive(Debug, Clone, Copy)]
struct Cursor {
    next: u64,
    /// First id not covered by a journaled reservation
    ceiling: u64,
}

impl Default for Cursor {
    fn default() -> Self {
        Self { next: 1, ceiling: 1 }
    }
}

#[derive(Debug, Default)]
struct Sequences {
    cursors: HashMap<Sequence, Cursor>,
}

impl Sequences {
    fn cursor(&mut self, sequence: Sequence) -> &mut Cursor {
        self.cursors.entry(sequence).or_default()
    }
}

/// In-memory store, optionally mirrored to an append-only journal
pub struct MemoryStore {
    state: RwLock<State>,
    sequences: Mutex<Sequences>,
    journal: Mutex<Option<JournalWriter>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            sequences: Mutex::new(Sequences::default()),
            journal: Mutex::new(None),
        }
    }

    /// Mirror every subsequent commit and id reservation to `journal`
    pub fn attach_journal(&self, journal: JournalWriter) {
        *self.journal.lock() = Some(journal);
    }

    pub fn has_journal(&self) -> bool {
        self.journal.lock().is_some()
    }

    /// Flush and fsync the attached journal, if any
    pub fn sync(&self) -> Result<(), StoreError> {
        if let Some(journal) = self.journal.lock().as_mut() {
            journal.sync()?;
        }
        Ok(())
    }

    pub fn order_count(&self) -> usize {
        self.state.read().orders.len()
    }

    pub fn trade_count(&self) -> usize {
        self.state.read().trades.len()
    }

    pub fn feed_trade_count(&self) -> usize {
        self.state.read().feed_trades.len()
    }

    pub fn all_trades(&self) -> Vec<Trade> {
        self.state.read().trades.values().cloned().collect()
    }

    /// Apply a batch read back from the journal (no journaling)
    pub(crate) fn replay_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut state = self.state.write();
        validate(&state, &batch)?;
        self.advance_past(&batch);
        apply(&mut state, batch);
        Ok(())
    }

    /// Apply an id reservation read back from the journal
    pub(crate) fn replay_reservation(&self, reservation: IdReservation) {
        let mut sequences = self.sequences.lock();
        let cursor = sequences.cursor(reservation.sequence);
        cursor.ceiling = cursor.ceiling.max(reservation.ceiling);
        cursor.next = cursor.next.max(reservation.ceiling);
    }

    /// Keep cursors ahead of every id present in the store
    fn advance_past(&self, batch: &WriteBatch) {
        let mut sequences = self.sequences.lock();
        for mutation in &batch.mutations {
            let (sequence, id) = match mutation {
                Mutation::UpsertInstrument(i) => (Sequence::Instrument, i.id.value()),
                Mutation::InsertOrder(o) | Mutation::UpdateOrder(o) => (Sequence::Order, o.id.value()),
                Mutation::InsertTrade(t) => (Sequence::Trade, t.id.value()),
                Mutation::InsertMarketData(p) => (Sequence::MarketData, p.id.value()),
                // venue ids, not drawn from a store sequence
                Mutation::InsertFeedTrade(_) => continue,
            };
            let cursor = sequences.cursor(sequence);
            cursor.next = cursor.next.max(id + 1);
        }
    }

    fn journal_record<T: Serialize>(&self, kind: RecordKind, record: &T) -> Result<(), StoreError> {
        let mut journal = self.journal.lock();
        if let Some(writer) = journal.as_mut() {
            let payload =
                bincode::serialize(record).map_err(|e| StoreError::Encoding(e.to_string()))?;
            let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
            let appended = writer.append(kind, timestamp, payload)?;
            debug!(sequence = appended.sequence, kind = ?kind, "journal record appended");
        }
        Ok(())
    }
}

impl Store for MemoryStore {
    fn instrument(&self, id: InstrumentId) -> Result<Option<Instrument>, StoreError> {
        Ok(self.state.read().instruments.get(&id).cloned())
    }

    fn instrument_by_symbol(&self, symbol: &str) -> Result<Option<Instrument>, StoreError> {
        let state = self.state.read();
        Ok(state
            .symbols
            .get(symbol)
            .and_then(|id| state.instruments.get(id))
            .cloned())
    }

    fn active_instruments(&self) -> Result<Vec<Instrument>, StoreError> {
        Ok(self
            .state
            .read()
            .instruments
            .values()
            .filter(|i| i.active)
            .cloned()
            .collect())
    }

    fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.state.read().orders.get(&id).cloned())
    }

    fn open_orders(&self, instrument_id: InstrumentId) -> Result<Vec<Order>, StoreError> {
        let mut open: Vec<Order> = self
            .state
            .read()
            .orders
            .values()
            .filter(|o| o.instrument_id == instrument_id && o.is_open())
            .cloned()
            .collect();
        open.sort_by_key(|o| (o.created_at, o.id));
        Ok(open)
    }

    fn trades_for_order(&self, order_id: OrderId) -> Result<Vec<Trade>, StoreError> {
        let state = self.state.read();
        Ok(state
            .trades_by_order
            .get(&order_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.trades.get(id))
            .cloned()
            .collect())
    }

    fn market_data(
        &self,
        instrument_id: InstrumentId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MarketDataPoint>, StoreError> {
        let state = self.state.read();
        let mut points: Vec<MarketDataPoint> = state
            .market_data
            .get(&instrument_id)
            .into_iter()
            .flatten()
            .filter(|p| p.timestamp >= from && p.timestamp <= to)
            .cloned()
            .collect();
        points.sort_by_key(|p| (p.timestamp, p.id));
        Ok(points)
    }

    fn latest_market_data(
        &self,
        instrument_id: InstrumentId,
    ) -> Result<Option<MarketDataPoint>, StoreError> {
        let state = self.state.read();
        Ok(state
            .market_data
            .get(&instrument_id)
            .and_then(|points| points.iter().max_by_key(|p| (p.timestamp, p.id)))
            .cloned())
    }

    fn feed_trade(&self, trade_id: u64) -> Result<Option<FeedTrade>, StoreError> {
        Ok(self.state.read().feed_trades.get(&trade_id).cloned())
    }

    fn allocate(&self, sequence: Sequence) -> Result<u64, StoreError> {
        let mut sequences = self.sequences.lock();
        let cursor = *sequences.cursor(sequence);

        // A restarted process must never hand out an id that an in-flight
        // message may already carry, so journaled stores reserve ids in blocks.
        if self.has_journal() && cursor.next >= cursor.ceiling {
            let reservation = IdReservation {
                sequence,
                ceiling: cursor.next + ID_BLOCK,
            };
            self.journal_record(RecordKind::IdReservation, &reservation)?;
            sequences.cursor(sequence).ceiling = reservation.ceiling;
        }

        let cursor = sequences.cursor(sequence);
        let id = cursor.next;
        cursor.next += 1;
        Ok(id)
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write();
        if let Err(err) = validate(&state, &batch) {
            warn!(error = %err, mutations = batch.len(), "write batch rejected");
            return Err(err);
        }
        self.journal_record(RecordKind::WriteBatch, &batch)?;
        self.advance_past(&batch);
        apply(&mut state, batch);
        Ok(())
    }
}

/// Overlay of the entities a batch touches, used to validate later
/// mutations against earlier ones in the same batch
#[derive(Default)]
struct Staged {
    instruments: HashMap<InstrumentId, Instrument>,
    orders: HashMap<OrderId, Order>,
    trades: std::collections::HashSet<TradeId>,
    market_data: std::collections::HashSet<MarketDataId>,
    feed_trades: std::collections::HashSet<u64>,
}

impl Staged {
    fn instrument<'a>(&'a self, state: &'a State, id: InstrumentId) -> Option<&'a Instrument> {
        self.instruments.get(&id).or_else(|| state.instruments.get(&id))
    }

    fn order<'a>(&'a self, state: &'a State, id: OrderId) -> Option<&'a Order> {
        self.orders.get(&id).or_else(|| state.orders.get(&id))
    }
}

fn validate(state: &State, batch: &WriteBatch) -> Result<(), StoreError> {
    let mut staged = Staged::default();

    for mutation in &batch.mutations {
        match mutation {
            Mutation::UpsertInstrument(instrument) => {
                validate_symbol(&instrument.symbol)
                    .map_err(|e| StoreError::Invalid(e.to_string()))?;
                if instrument.id.is_unassigned() {
                    return Err(StoreError::Invalid("instrument id 0".into()));
                }
                let clash = state
                    .symbols
                    .get(&instrument.symbol)
                    .is_some_and(|id| *id != instrument.id)
                    || staged
                        .instruments
                        .values()
                        .any(|i| i.symbol == instrument.symbol && i.id != instrument.id);
                if clash {
                    return Err(StoreError::Invalid(format!(
                        "symbol {} already taken",
                        instrument.symbol
                    )));
                }
                staged.instruments.insert(instrument.id, instrument.clone());
            }
            Mutation::InsertOrder(order) => {
                if order.id.is_unassigned() {
                    return Err(StoreError::Invalid("order id 0".into()));
                }
                if staged.order(state, order.id).is_some() {
                    return Err(StoreError::Duplicate {
                        entity: "order",
                        id: order.id.value(),
                    });
                }
                if staged.instrument(state, order.instrument_id).is_none() {
                    return Err(StoreError::UnknownInstrument(order.instrument_id));
                }
                check_order(order)?;
                staged.orders.insert(order.id, order.clone());
            }
            Mutation::UpdateOrder(order) => {
                let current = staged
                    .order(state, order.id)
                    .ok_or(StoreError::UnknownOrder(order.id))?;
                let immutable_changed = current.client_id != order.client_id
                    || current.instrument_id != order.instrument_id
                    || current.kind != order.kind
                    || current.side != order.side
                    || current.quantity != order.quantity
                    || current.price != order.price
                    || current.created_at != order.created_at;
                if immutable_changed {
                    return Err(StoreError::Invalid(format!(
                        "order {} update changes immutable fields",
                        order.id
                    )));
                }
                if order.filled_quantity < current.filled_quantity {
                    return Err(StoreError::Invalid(format!(
                        "order {} filled quantity would decrease from {} to {}",
                        order.id, current.filled_quantity, order.filled_quantity
                    )));
                }
                check_order(order)?;
                staged.orders.insert(order.id, order.clone());
            }
            Mutation::InsertTrade(trade) => {
                if trade.id.is_unassigned() {
                    return Err(StoreError::Invalid("trade id 0".into()));
                }
                if state.trades.contains_key(&trade.id) || staged.trades.contains(&trade.id) {
                    return Err(StoreError::Duplicate {
                        entity: "trade",
                        id: trade.id.value(),
                    });
                }
                if trade.buy_order_id == trade.sell_order_id || trade.quantity == 0 {
                    return Err(StoreError::Invalid(format!("malformed trade {}", trade.id)));
                }
                let buy = staged
                    .order(state, trade.buy_order_id)
                    .ok_or(StoreError::UnknownOrder(trade.buy_order_id))?;
                let sell = staged
                    .order(state, trade.sell_order_id)
                    .ok_or(StoreError::UnknownOrder(trade.sell_order_id))?;
                if buy.side != Side::Buy || sell.side != Side::Sell {
                    return Err(StoreError::Invalid(format!(
                        "trade {} does not reference one buy and one sell order",
                        trade.id
                    )));
                }
                if buy.instrument_id != trade.instrument_id
                    || sell.instrument_id != trade.instrument_id
                {
                    return Err(StoreError::Invalid(format!(
                        "trade {} spans instruments",
                        trade.id
                    )));
                }
                staged.trades.insert(trade.id);
            }
            Mutation::InsertMarketData(point) => {
                if point.id.is_unassigned() {
                    return Err(StoreError::Invalid("market data id 0".into()));
                }
                if state.market_data_ids.contains(&point.id) || staged.market_data.contains(&point.id)
                {
                    return Err(StoreError::Duplicate {
                        entity: "market data",
                        id: point.id.value(),
                    });
                }
                if staged.instrument(state, point.instrument_id).is_none() {
                    return Err(StoreError::UnknownInstrument(point.instrument_id));
                }
                staged.market_data.insert(point.id);
            }
            Mutation::InsertFeedTrade(trade) => {
                trade
                    .validate()
                    .map_err(|e| StoreError::Invalid(format!("feed trade {}: {e}", trade.trade_id)))?;
                if state.feed_trades.contains_key(&trade.trade_id)
                    || !staged.feed_trades.insert(trade.trade_id)
                {
                    return Err(StoreError::Duplicate {
                        entity: "feed trade",
                        id: trade.trade_id,
                    });
                }
            }
        }
    }
    Ok(())
}

fn check_order(order: &Order) -> Result<(), StoreError> {
    if order.quantity == 0 {
        return Err(StoreError::Invalid(format!("order {} has zero quantity", order.id)));
    }
    if !order.check_invariant() {
        return Err(StoreError::Invalid(format!(
            "order {} violates fill invariants (filled {} of {}, status {:?})",
            order.id, order.filled_quantity, order.quantity, order.status
        )));
    }
    if order.is_market() && !order.price.is_zero() {
        return Err(StoreError::Invalid(format!(
            "market order {} must carry price 0",
            order.id
        )));
    }
    Ok(())
}

fn apply(state: &mut State, batch: WriteBatch) {
    for mutation in batch.mutations {
        match mutation {
            Mutation::UpsertInstrument(instrument) => {
                state.symbols.insert(instrument.symbol.clone(), instrument.id);
                state.instruments.insert(instrument.id, instrument);
            }
            Mutation::InsertOrder(order) | Mutation::UpdateOrder(order) => {
                state.orders.insert(order.id, order);
            }
            Mutation::InsertTrade(trade) => {
                for order_id in [trade.buy_order_id, trade.sell_order_id] {
                    state.trades_by_order.entry(order_id).or_default().push(trade.id);
                }
                state.trades.insert(trade.id, trade);
            }
            Mutation::InsertMarketData(point) => {
                state.market_data_ids.insert(point.id);
                state
                    .market_data
                    .entry(point.instrument_id)
                    .or_default()
                    .push(point);
            }
            Mutation::InsertFeedTrade(trade) => {
                state.feed_trades.insert(trade.trade_id, trade);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn seeded() -> (MemoryStore, InstrumentId) {
        let store = MemoryStore::new();
        let id = store.allocate_instrument_id().unwrap();
        let instrument = Instrument::new(
            id,
            "AAPL",
            "Apple Inc.",
            Price::from_u64(150),
            Price::from_cents(14_850),
            ts(0),
        )
        .unwrap();
        let mut batch = WriteBatch::new();
        batch.push(Mutation::UpsertInstrument(instrument));
        store.commit(batch).unwrap();
        (store, id)
    }

    fn order(store: &MemoryStore, instrument: InstrumentId, side: Side, qty: u64, at: i64) -> Order {
        Order::new_pending(
            store.allocate_order_id().unwrap(),
            "client",
            instrument,
            OrderKind::Limit,
            side,
            qty,
            Price::from_u64(100),
            ts(at),
        )
        .unwrap()
    }

    fn insert(store: &MemoryStore, order: &Order) {
        let mut batch = WriteBatch::new();
        batch.push(Mutation::InsertOrder(order.clone()));
        store.commit(batch).unwrap();
    }

    #[test]
    fn test_sequences_start_at_one_and_never_repeat() {
        let store = MemoryStore::new();
        assert_eq!(store.allocate_order_id().unwrap(), OrderId::new(1));
        assert_eq!(store.allocate_order_id().unwrap(), OrderId::new(2));
        assert_eq!(store.allocate_trade_id().unwrap(), TradeId::new(1));
    }

    #[test]
    fn test_instrument_lookup() {
        let (store, id) = seeded();
        assert_eq!(store.instrument_by_symbol("AAPL").unwrap().unwrap().id, id);
        assert!(store.instrument_by_symbol("MSFT").unwrap().is_none());
        assert_eq!(store.active_instruments().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_symbol_rejected() {
        let (store, _) = seeded();
        let other = Instrument::new(
            store.allocate_instrument_id().unwrap(),
            "AAPL",
            "Copy",
            Price::ZERO,
            Price::ZERO,
            ts(0),
        )
        .unwrap();
        let mut batch = WriteBatch::new();
        batch.push(Mutation::UpsertInstrument(other));
        assert!(matches!(store.commit(batch), Err(StoreError::Invalid(_))));
    }

    #[test]
    fn test_trade_batch_is_atomic() {
        let (store, instrument) = seeded();
        let sell = order(&store, instrument, Side::Sell, 10, 1);
        let buy = order(&store, instrument, Side::Buy, 4, 2);
        insert(&store, &sell);
        insert(&store, &buy);

        let trade = Trade::new(
            store.allocate_trade_id().unwrap(),
            buy.id,
            sell.id,
            instrument,
            4,
            Price::from_u64(100),
            ts(3),
        )
        .unwrap();
        let filled_sell = sell.with_fill(4, trade.price, ts(3)).unwrap();
        let mut bogus_buy = buy.with_fill(4, trade.price, ts(3)).unwrap();
        bogus_buy.quantity = 99;

        let mut batch = WriteBatch::new();
        batch
            .push(Mutation::InsertTrade(trade.clone()))
            .push(Mutation::UpdateOrder(filled_sell))
            .push(Mutation::UpdateOrder(bogus_buy));
        assert!(store.commit(batch).is_err());

        // nothing from the failed batch is visible
        assert_eq!(store.trade_count(), 0);
        assert_eq!(store.order(sell.id).unwrap().unwrap().filled_quantity, 0);
    }

    #[test]
    fn test_update_cannot_decrease_fill() {
        let (store, instrument) = seeded();
        let sell = order(&store, instrument, Side::Sell, 10, 1);
        let filled = sell.with_fill(5, Price::from_u64(100), ts(2)).unwrap();
        insert(&store, &filled);

        let mut batch = WriteBatch::new();
        batch.push(Mutation::UpdateOrder(sell));
        assert!(matches!(store.commit(batch), Err(StoreError::Invalid(_))));
    }

    #[test]
    fn test_trade_must_reference_buy_and_sell() {
        let (store, instrument) = seeded();
        let a = order(&store, instrument, Side::Sell, 10, 1);
        let b = order(&store, instrument, Side::Sell, 10, 2);
        insert(&store, &a);
        insert(&store, &b);

        let trade = Trade::new(
            store.allocate_trade_id().unwrap(),
            a.id,
            b.id,
            instrument,
            1,
            Price::from_u64(100),
            ts(3),
        )
        .unwrap();
        let mut batch = WriteBatch::new();
        batch.push(Mutation::InsertTrade(trade));
        assert!(matches!(store.commit(batch), Err(StoreError::Invalid(_))));
    }

    #[test]
    fn test_open_orders_oldest_first() {
        let (store, instrument) = seeded();
        let late = order(&store, instrument, Side::Sell, 10, 5);
        let early = order(&store, instrument, Side::Buy, 10, 1);
        let done = order(&store, instrument, Side::Buy, 3, 0)
            .with_fill(3, Price::from_u64(100), ts(1))
            .unwrap();
        insert(&store, &late);
        insert(&store, &early);
        insert(&store, &done);

        let open = store.open_orders(instrument).unwrap();
        let ids: Vec<OrderId> = open.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);
    }

    #[test]
    fn test_market_data_range_and_latest() {
        let (store, instrument) = seeded();
        let mut batch = WriteBatch::new();
        for (secs, cents) in [(30, 15_200), (10, 15_000), (20, 15_100)] {
            batch.push(Mutation::InsertMarketData(MarketDataPoint {
                id: store.allocate_market_data_id().unwrap(),
                instrument_id: instrument,
                price: Price::from_cents(cents),
                volume: 1,
                timestamp: ts(secs),
                kind: MarketDataKind::Trade,
            }));
        }
        store.commit(batch).unwrap();

        let history = store.market_data(instrument, ts(0), ts(25)).unwrap();
        let prices: Vec<Price> = history.iter().map(|p| p.price).collect();
        assert_eq!(prices, vec![Price::from_cents(15_000), Price::from_cents(15_100)]);

        let latest = store.latest_market_data(instrument).unwrap().unwrap();
        assert_eq!(latest.price, Price::from_cents(15_200));
        assert!(store
            .market_data(instrument, ts(0) - Duration::days(1), ts(0))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_trades_for_order() {
        let (store, instrument) = seeded();
        let sell = order(&store, instrument, Side::Sell, 10, 1);
        let buy = order(&store, instrument, Side::Buy, 10, 2);
        insert(&store, &sell);
        insert(&store, &buy);

        let trade = Trade::new(
            store.allocate_trade_id().unwrap(),
            buy.id,
            sell.id,
            instrument,
            10,
            Price::from_u64(100),
            ts(3),
        )
        .unwrap();
        let mut batch = WriteBatch::new();
        batch
            .push(Mutation::InsertTrade(trade.clone()))
            .push(Mutation::UpdateOrder(sell.with_fill(10, trade.price, ts(3)).unwrap()))
            .push(Mutation::UpdateOrder(buy.with_fill(10, trade.price, ts(3)).unwrap()));
        store.commit(batch).unwrap();

        assert_eq!(store.trades_for_order(sell.id).unwrap(), vec![trade.clone()]);
        assert_eq!(store.trades_for_order(buy.id).unwrap(), vec![trade]);
        assert!(store.open_orders(instrument).unwrap().is_empty());
    }

    fn feed_trade(id: u64, symbol: &str) -> FeedTrade {
        FeedTrade {
            symbol: symbol.into(),
            trade_id: id,
            price: Price::from_cents(6_425_010),
            quantity: "0.5".parse().unwrap(),
            event_type: "trade".into(),
            event_time: Some(ts(1)),
            traded_at: Some(ts(1)),
        }
    }

    #[test]
    fn test_feed_trades_are_unique_by_venue_id() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch
            .push(Mutation::InsertFeedTrade(feed_trade(11, "BTCUSDT")))
            .push(Mutation::InsertFeedTrade(feed_trade(12, "BTCUSDT")));
        store.commit(batch).unwrap();
        assert_eq!(store.feed_trade(11).unwrap().unwrap().symbol, "BTCUSDT");
        assert!(store.feed_trade(13).unwrap().is_none());

        let mut again = WriteBatch::new();
        again
            .push(Mutation::InsertFeedTrade(feed_trade(13, "BTCUSDT")))
            .push(Mutation::InsertFeedTrade(feed_trade(12, "BTCUSDT")));
        assert!(matches!(
            store.commit(again),
            Err(StoreError::Duplicate { entity: "feed trade", id: 12 })
        ));
        assert_eq!(store.feed_trade_count(), 2);

        let mut twice = WriteBatch::new();
        twice
            .push(Mutation::InsertFeedTrade(feed_trade(14, "BTCUSDT")))
            .push(Mutation::InsertFeedTrade(feed_trade(14, "BTCUSDT")));
        assert!(store.commit(twice).is_err());
        assert!(store.feed_trade(14).unwrap().is_none());
    }

    #[test]
    fn test_feed_trades_leave_sequences_alone() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.push(Mutation::InsertFeedTrade(feed_trade(9_000, "BTCUSDT")));
        store.commit(batch).unwrap();
        assert_eq!(store.allocate_trade_id().unwrap(), TradeId::new(1));
    }
}
