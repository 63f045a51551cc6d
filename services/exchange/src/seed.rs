//! Startup instrument seeding

use chrono::Utc;
use persistence::{Mutation, Store, WriteBatch};
use tracing::info;
use types::instrument::Instrument;

use crate::error::PipelineError;
use crate::settings::InstrumentSeed;

/// Insert every seed whose symbol is not stored yet, in one commit.
///
/// Existing instruments are left as they are. Returns how many were added.
pub fn seed_instruments(store: &dyn Store, seeds: &[InstrumentSeed]) -> Result<usize, PipelineError> {
    let now = Utc::now();
    let mut batch = WriteBatch::new();

    for seed in seeds {
        if store.instrument_by_symbol(&seed.symbol)?.is_some() {
            continue;
        }
        let instrument = Instrument::new(
            store.allocate_instrument_id()?,
            seed.symbol.clone(),
            seed.name.clone(),
            seed.current_price,
            seed.previous_price,
            now,
        )?;
        batch.push(Mutation::UpsertInstrument(instrument));
    }

    let added = batch.len();
    if added > 0 {
        store.commit(batch)?;
        info!(added, "instruments seeded");
    }
    Ok(added)
}
