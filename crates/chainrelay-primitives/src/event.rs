use serde::{Deserialize, Serialize};

use crate::ids::RequestId;

/// An aggregate state-transition record, as persisted in a per-aggregate
/// event table. `version` is monotonic per `aggregate_id`, starting at 1,
/// strictly increasing and dense (no gaps) -- see spec.md §3 "Event".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub aggregate_id: String,
    pub version: u64,
    pub request_id: RequestId,
    /// `-1` encoded as `None` at this layer; callers that need the SQL
    /// representation convert through [`OutboxRow`].
    pub block_height: Option<u64>,
    pub timestamp_micros: u64,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub is_compressed: bool,
}

/// A row in the shared outbox table: one per emitted [`Event`], deleted
/// once delivery is acknowledged.
///
/// Invariant: ids assigned within one persistence transaction form a
/// contiguous ascending range; two successive persistence transactions
/// produce disjoint, strictly greater ranges. Enforced by the id generator
/// in `chainrelay-store`, not by this type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxRow {
    pub id: i64,
    pub aggregate_id: String,
    pub event_type: String,
    pub event_version: u64,
    pub request_id: RequestId,
    pub block_height: i64,
    pub payload: Vec<u8>,
    pub is_compressed: bool,
    pub timestamp_micros: u64,
    pub uncompressed_length: u64,
}

/// A point-in-time serialized aggregate state. At most one snapshot per
/// `(aggregate_id, block_height)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub aggregate_id: String,
    pub version: u64,
    pub block_height: i64,
    pub payload: Vec<u8>,
    pub is_compressed: bool,
}
