use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("envelope too large: {size} bytes exceeds cap of {max}")]
    EnvelopeTooLarge { size: usize, max: usize },
    #[error("producer is not connected")]
    NotConnected,
    #[error("ack already pending")]
    AckAlreadyPending,
    #[error("ack timeout")]
    AckTimeout,
    #[error("producer destroyed")]
    Destroyed,
    #[error("timed out waiting for producer to come online")]
    OnlineTimeout,
    #[error("failed to serialize envelope: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("transport send failed: {0}")]
    Send(String),
}
