//! Bounded, byte-sized FIFO of fetched blocks awaiting processing.

pub mod block_queue;
pub mod error;

pub use block_queue::{BlockQueue, BlockQueueEntry};
pub use error::BlockQueueError;
