use chainrelay_primitives::Event;

use crate::error::AggregateError;

/// Common contract for every aggregate root (spec.md §3 "Aggregate root":
/// "Mutations occur only through `apply(event)`; `apply` both records the
/// event in unsaved-events and dispatches to a type-specific idempotent
/// handler that updates in-memory state. External code never mutates
/// fields directly.").
pub trait Aggregate {
    fn aggregate_id(&self) -> &str;
    fn version(&self) -> u64;
    fn last_block_height(&self) -> i64;
    fn unsaved_events(&self) -> &[Event];

    /// Dispatches `event` to the type-specific handler and records it in
    /// unsaved-events. Idempotent: an event whose version has already
    /// been applied is a silent no-op, so replaying the same event twice
    /// (e.g. after an at-least-once redelivery) never double-applies.
    fn apply(&mut self, event: Event) -> Result<(), AggregateError>;

    /// Clears the unsaved-events list, called by the store after a
    /// successful `persistAggregatesAndOutbox` commit.
    fn clear_unsaved_events(&mut self);
}
