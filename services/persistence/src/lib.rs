//! Durable store for the exchange core
//!
//! Provides the repository-style [`Store`](store::Store) contract used by the
//! matching engine and market data state, an in-memory implementation whose
//! commits are atomic per [`WriteBatch`](store::WriteBatch), an append-only
//! CRC32C-framed commit journal mirroring every commit, and journal replay for
//! crash recovery.

pub mod journal;
pub mod reader;
pub mod store;
pub mod recovery;
pub mod fault;

pub use fault::FlakyStore;
pub use journal::{FsyncPolicy, JournalConfig};
pub use reader::{Damage, DamageKind};
pub use recovery::{open_durable_store, RecoveryError, RecoveryReport};
pub use store::{MemoryStore, Mutation, Sequence, Store, StoreError, WriteBatch};
