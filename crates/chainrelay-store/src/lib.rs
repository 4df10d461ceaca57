//! SQLite-backed `EventStore`/outbox persistence for the chainrelay
//! indexing runtime: per-aggregate event tables, a shared outbox table
//! drained by the delivery loop, and periodic aggregate snapshots.

mod error;
mod id_gen;
mod schema;
mod store;

pub use error::{StoreError, StoreResult};
pub use id_gen::OutboxIdGenerator;
pub use store::{DeliverError, DeliverOutcome, EventStore, FetchOptions, OrderDir, PersistOutcome, SnapshotPruneOptions};
