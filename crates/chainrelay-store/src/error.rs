use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to compress payload: {0}")]
    Compression(std::io::Error),
    #[error("failed to decompress payload: {0}")]
    Decompression(std::io::Error),
    #[error("failed to apply replayed event during rehydration: {0}")]
    Rehydrate(#[from] chainrelay_aggregates::AggregateError),
    #[error("aggregate id {0:?} is not a valid SQL identifier")]
    InvalidAggregateId(String),
    #[error("no snapshot found for aggregate {0:?} at or below height {1}")]
    NoSnapshot(String, i64),
}

pub type StoreResult<T> = Result<T, StoreError>;
