use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Store(#[from] chainrelay_store::StoreError),
    #[error(transparent)]
    Transport(#[from] chainrelay_transport::TransportError),
}
