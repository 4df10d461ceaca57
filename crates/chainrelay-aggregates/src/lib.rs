//! Event-sourced aggregate roots for the chainrelay indexing runtime.
//!
//! Every mutation to durable domain state passes through
//! [`Aggregate::apply`]; commands (`propose_*` methods) decide which event
//! to emit and apply it to themselves before handing it to the store.

mod aggregate;
mod error;
mod mempool;
mod network;

pub use aggregate::Aggregate;
pub use error::AggregateError;
pub use mempool::{MempoolAggregate, MEMPOOL_TX_ADDED_EVENT, MEMPOOL_TX_REMOVED_EVENT};
pub use network::{
    NetworkAggregate, RemoteHashSource, ADD_BLOCKS_EVENT, NETWORK_CLEARED_EVENT, NETWORK_REORGANIZED_EVENT,
};
