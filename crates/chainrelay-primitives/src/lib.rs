//! Shared domain types for the chainrelay indexing runtime: blocks, hashes,
//! events, outbox rows, and the wire envelope. Kept dependency-light since
//! every other crate in the workspace depends on this one.

pub mod block;
pub mod envelope;
pub mod event;
pub mod hash;
pub mod ids;

pub use block::{Block, LightBlock, TxId};
pub use envelope::{
    Action, Envelope, OutboxStreamAckPayload, OutboxStreamBatchPayload, QueryRequestPayload, QueryResponsePayload,
    WireEvent, ENVELOPE_OVERHEAD_BYTES,
};
pub use event::{Event, OutboxRow, Snapshot};
pub use hash::BlockHash32;
pub use ids::RequestId;
