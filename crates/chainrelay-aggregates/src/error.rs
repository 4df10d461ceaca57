use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("event for aggregate {event_aggregate_id} applied to wrong aggregate {self_aggregate_id}")]
    WrongAggregate {
        event_aggregate_id: String,
        self_aggregate_id: String,
    },
    #[error("event version gap: expected {expected}, got {got}")]
    VersionGap { expected: u64, got: u64 },
    #[error("unknown event type {0:?}")]
    UnknownEventType(String),
    #[error("failed to decode event payload: {0}")]
    PayloadDecode(#[from] std::io::Error),
    /// Terminal error for reorg descent: no fork point was found within
    /// the retained chain before reaching the genesis sentinel. Spec.md
    /// §7: "GenesisReached: terminal error for reorg descent; not
    /// recovered locally."
    #[error("reorg descent reached genesis sentinel without finding a fork point")]
    GenesisReached,
    #[error("addBlocks called with an empty batch")]
    EmptyBatch,
}
