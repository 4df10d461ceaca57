//! Drains the outbox through a selected wire transport with
//! at-least-once delivery and a single in-flight ACK per chunk.

mod delivery_loop;
mod error;

pub use delivery_loop::{DeliveryLoop, DeliveryLoopConfig, TickOutcome};
pub use error::DeliveryError;
