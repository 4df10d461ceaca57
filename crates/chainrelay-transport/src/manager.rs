use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chainrelay_primitives::envelope::OutboxStreamBatchPayload;
use chainrelay_primitives::{Action, Envelope, WireEvent};
use parking_lot::RwLock;
use tracing::warn;

use crate::error::TransportError;
use crate::producer::{Producer, RawTransport};

const STREAMING_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, Default)]
pub struct StreamAckResult {
    pub all_ok: bool,
    pub ok_indices: Vec<usize>,
}

/// Registry + selection over the producers a node currently has open
/// (spec.md §4.9). A single generic `T: RawTransport` parameter would
/// force every producer to share one transport type, so this is kept
/// generic per-instance: callers construct one `ProducerManager<T>` per
/// transport kind they actually use (HTTP, WS, IPC), or erase to a common
/// trait object if they need a truly mixed registry.
pub struct ProducerManager<T: RawTransport> {
    producers: RwLock<HashMap<String, Arc<Producer<T>>>>,
    streaming: RwLock<Option<String>>,
}

impl<T: RawTransport + 'static> ProducerManager<T> {
    pub fn new() -> Self {
        Self {
            producers: RwLock::new(HashMap::new()),
            streaming: RwLock::new(None),
        }
    }

    pub fn register(&self, name: impl Into<String>, producer: Arc<Producer<T>>) {
        self.producers.write().insert(name.into(), producer);
    }

    pub fn set_streaming_producer(&self, name: Option<String>) {
        *self.streaming.write() = name;
    }

    pub fn get_streaming(&self) -> Option<Arc<Producer<T>>> {
        let name = self.streaming.read().clone()?;
        self.producers.read().get(&name).cloned()
    }

    /// Frames `events` as an `OutboxStreamBatch` and delegates to the
    /// selected streaming producer's ACK-gated send. With no streaming
    /// producer selected, this is a neutral success (spec.md §4.9).
    pub async fn stream_wire_with_ack(
        &self,
        events: Vec<WireEvent>,
        timestamp_fn: impl Fn() -> u64,
    ) -> Result<StreamAckResult, TransportError> {
        let Some(producer) = self.get_streaming() else {
            return Ok(StreamAckResult {
                all_ok: true,
                ok_indices: Vec::new(),
            });
        };

        producer.wait_for_online(STREAMING_CONNECT_TIMEOUT).await?;

        let env = Envelope::new(
            Action::OutboxStreamBatch,
            serde_json::to_value(OutboxStreamBatchPayload { events }).unwrap_or(serde_json::Value::Null),
            timestamp_fn(),
        );

        let ack_value = producer
            .wait_for_ack(|| {
                let producer = Arc::clone(&producer);
                let env = env.clone();
                async move { producer.send_message(&env).await }
            })
            .await?;

        let all_ok = ack_value.get("all_ok").and_then(|v| v.as_bool()).unwrap_or(false);
        let ok_indices = ack_value
            .get("ok_indices")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_u64()).map(|v| v as usize).collect())
            .unwrap_or_default();
        Ok(StreamAckResult { all_ok, ok_indices })
    }

    /// Sends `env` to every currently-connected producer. Individual
    /// failures are logged, not propagated -- one dead producer must not
    /// prevent delivery to the others.
    pub async fn broadcast(&self, env: &Envelope) {
        let producers: Vec<Arc<Producer<T>>> = self.producers.read().values().cloned().collect();
        for producer in producers {
            if !producer.is_connected() {
                continue;
            }
            if let Err(err) = producer.send_message(env).await {
                warn!(%err, "broadcast send failed for one producer");
            }
        }
    }
}

impl<T: RawTransport + 'static> Default for ProducerManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::producer::ProducerConfig;

    struct StubTransport {
        connected: AtomicBool,
    }

    #[async_trait]
    impl RawTransport for StubTransport {
        async fn raw_send(&self, _json: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }
        fn is_transport_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    fn producer(connected: bool) -> Arc<Producer<StubTransport>> {
        Producer::new(
            Arc::new(StubTransport {
                connected: AtomicBool::new(connected),
            }),
            ProducerConfig::default(),
        )
    }

    #[tokio::test]
    async fn no_streaming_producer_is_a_neutral_success() {
        let mgr: ProducerManager<StubTransport> = ProducerManager::new();
        let result = mgr.stream_wire_with_ack(Vec::new(), || 1).await.unwrap();
        assert!(result.all_ok);
        assert!(result.ok_indices.is_empty());
    }

    #[tokio::test]
    async fn broadcast_skips_disconnected_producers() {
        let mgr: ProducerManager<StubTransport> = ProducerManager::new();
        mgr.register("a", producer(true));
        mgr.register("b", producer(false));
        let env = Envelope::new(Action::Ping, serde_json::json!({}), 1);
        // Should not panic or propagate an error for the disconnected one.
        mgr.broadcast(&env).await;
    }

    #[tokio::test]
    async fn get_streaming_returns_registered_producer() {
        let mgr: ProducerManager<StubTransport> = ProducerManager::new();
        mgr.register("primary", producer(true));
        mgr.set_streaming_producer(Some("primary".to_string()));
        assert!(mgr.get_streaming().is_some());
    }
}
