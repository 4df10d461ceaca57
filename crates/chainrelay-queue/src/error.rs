use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlockQueueError {
    #[error("block at height {height} does not extend queue tail (expected height {expected})")]
    NonConsecutiveHeight { height: u64, expected: u64 },
    #[error("enqueuing {incoming} bytes would exceed max queue size {max} (current {current})")]
    QueueFull {
        current: u64,
        incoming: u64,
        max: u64,
    },
    #[error("queue tail height {last} has reached the configured ceiling {max}")]
    HeightCeilingReached { last: i64, max: u64 },
    #[error("dequeue hash mismatch at head: expected {expected}, got {actual}")]
    HeadMismatch { expected: String, actual: String },
    #[error("queue is empty")]
    Empty,
}
