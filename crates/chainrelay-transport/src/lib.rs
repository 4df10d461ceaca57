//! Wire transport layer: `Producer` (connection ownership, liveness,
//! single in-flight ACK), `Consumer` (incoming envelope dispatch), and
//! `ProducerManager` (registry + streaming selection), over three
//! concrete transports.

mod consumer;
mod error;
mod http_producer;
mod ipc_producer;
mod manager;
mod producer;
mod ws_producer;

pub use consumer::{Consumer, QueryHandler, ReplyContext};
pub use error::TransportError;
pub use http_producer::HttpTransport;
pub use ipc_producer::IpcTransport;
pub use manager::{ProducerManager, StreamAckResult};
pub use producer::{Producer, ProducerConfig, RawTransport};
pub use ws_producer::WsTransport;
