use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chainrelay_primitives::envelope::{OutboxStreamAckPayload, QueryResponsePayload};
use chainrelay_primitives::{Action, Envelope};
use tracing::warn;

use crate::error::TransportError;
use crate::producer::{Producer, RawTransport};

/// Replies to an incoming envelope on the same connection it arrived on.
/// Implemented per concrete transport (HTTP response writer, WS sink, IPC
/// stream).
#[async_trait]
pub trait ReplyContext: Send + Sync {
    async fn reply(&self, env: &Envelope) -> Result<(), TransportError>;
}

/// A named, closed-registry query handler: maps a `QueryRequest.name` to
/// a synchronous execution over the domain query bus.
pub type QueryHandler = Arc<dyn Fn(Option<serde_json::Value>) -> Result<serde_json::Value, String> + Send + Sync>;

/// Demultiplexes incoming envelopes to the right handler, per spec.md
/// §4.8. Grounded on `crates/btcio/src/broadcaster/task.rs`'s dispatch
/// loop shape (match on message kind, delegate to a handler fn per
/// variant) applied to wire envelope actions instead of broadcast-state
/// transitions.
pub struct Consumer<T: RawTransport> {
    producer: Arc<Producer<T>>,
    query_handlers: HashMap<String, QueryHandler>,
}

impl<T: RawTransport + 'static> Consumer<T> {
    pub fn new(producer: Arc<Producer<T>>) -> Self {
        Self {
            producer,
            query_handlers: HashMap::new(),
        }
    }

    pub fn register_query_handler(&mut self, name: impl Into<String>, handler: QueryHandler) {
        self.query_handlers.insert(name.into(), handler);
    }

    pub async fn dispatch(&self, env: Envelope, ctx: &dyn ReplyContext, timestamp_fn: impl Fn() -> u64) {
        match env.action.clone() {
            Action::Ping => {
                let pong = Envelope::new(Action::Pong, serde_json::json!({}), timestamp_fn())
                    .with_correlation_id_opt(env.request_id);
                if let Err(err) = ctx.reply(&pong).await {
                    warn!(%err, "failed to reply with pong");
                }
            }
            Action::Pong => {
                self.producer.on_pong();
            }
            Action::QueryRequest => {
                self.handle_query_request(env, ctx, &timestamp_fn).await;
            }
            Action::OutboxStreamAck => {
                let ack: Result<OutboxStreamAckPayload, _> = serde_json::from_value(env.payload);
                match ack {
                    Ok(ack) => {
                        self.producer
                            .resolve_ack(serde_json::to_value(ack).unwrap_or(serde_json::Value::Null))
                            .await;
                    }
                    Err(err) => warn!(%err, "malformed OutboxStreamAck payload"),
                }
            }
            Action::Business(_) | Action::QueryResponse | Action::OutboxStreamBatch => {
                self.handle_business_message(env, ctx).await;
            }
        }
    }

    async fn handle_query_request(&self, env: Envelope, ctx: &dyn ReplyContext, timestamp_fn: &impl Fn() -> u64) {
        let name = env
            .payload
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let dto = env.payload.get("dto").cloned();

        let response_payload = match self.query_handlers.get(&name) {
            Some(handler) => match handler(dto) {
                Ok(data) => QueryResponsePayload {
                    name: name.clone(),
                    data: Some(data),
                    err: None,
                },
                Err(err) => QueryResponsePayload {
                    name: name.clone(),
                    data: None,
                    err: Some(err),
                },
            },
            None => QueryResponsePayload {
                name: name.clone(),
                data: None,
                err: Some(format!("unknown query {name:?}")),
            },
        };

        let mut reply = Envelope::new(
            Action::QueryResponse,
            serde_json::to_value(response_payload).unwrap_or(serde_json::Value::Null),
            timestamp_fn(),
        );
        reply.correlation_id = env.request_id;
        if let Err(err) = ctx.reply(&reply).await {
            warn!(%err, "failed to reply to query request");
        }
    }

    /// Hook for anything not in the closed action set above -- business
    /// envelopes, default no-op. Concrete deployments override dispatch
    /// behavior by wrapping `Consumer` rather than subclassing, since Rust
    /// has no inheritance; this default just logs.
    async fn handle_business_message(&self, env: Envelope, _ctx: &dyn ReplyContext) {
        warn!(action = ?env.action, "unhandled business envelope");
    }
}

trait WithCorrelationOpt {
    fn with_correlation_id_opt(self, id: Option<chainrelay_primitives::RequestId>) -> Self;
}

impl WithCorrelationOpt for Envelope {
    fn with_correlation_id_opt(mut self, id: Option<chainrelay_primitives::RequestId>) -> Self {
        self.correlation_id = id;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tokio::sync::Mutex as AsyncMutex;

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

    struct RecordingCtx {
        replies: AsyncMutex<Vec<Envelope>>,
    }

    #[async_trait]
    impl ReplyContext for RecordingCtx {
        async fn reply(&self, env: &Envelope) -> Result<(), TransportError> {
            self.replies.lock().await.push(env.clone());
            Ok(())
        }
    }

    fn consumer() -> (Consumer<StubTransport>, Arc<Producer<StubTransport>>) {
        let producer = Producer::new(
            Arc::new(StubTransport {
                connected: AtomicBool::new(true),
            }),
            ProducerConfig::default(),
        );
        (Consumer::new(Arc::clone(&producer)), producer)
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let (consumer, _producer) = consumer();
        let ctx = RecordingCtx {
            replies: AsyncMutex::new(Vec::new()),
        };
        let env = Envelope::new(Action::Ping, serde_json::json!({}), 1);
        consumer.dispatch(env, &ctx, || 2).await;
        let replies = ctx.replies.lock().await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].action, Action::Pong);
    }

    #[tokio::test]
    async fn pong_resets_producer_liveness() {
        let (consumer, producer) = consumer();
        let ctx = RecordingCtx {
            replies: AsyncMutex::new(Vec::new()),
        };
        let env = Envelope::new(Action::Pong, serde_json::json!({}), 1);
        consumer.dispatch(env, &ctx, || 2).await;
        assert!(producer.is_connected());
    }

    #[tokio::test]
    async fn query_request_dispatches_to_registered_handler() {
        let (mut consumer, _producer) = consumer();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        consumer.register_query_handler(
            "ping_count",
            Arc::new(move |_dto| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(serde_json::json!({"count": 1}))
            }),
        );
        let ctx = RecordingCtx {
            replies: AsyncMutex::new(Vec::new()),
        };
        let env = Envelope::new(
            Action::QueryRequest,
            serde_json::json!({"name": "ping_count"}),
            1,
        );
        consumer.dispatch(env, &ctx, || 2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let replies = ctx.replies.lock().await;
        assert_eq!(replies[0].action, Action::QueryResponse);
    }

    #[tokio::test]
    async fn unknown_query_name_replies_with_error() {
        let (consumer, _producer) = consumer();
        let ctx = RecordingCtx {
            replies: AsyncMutex::new(Vec::new()),
        };
        let env = Envelope::new(Action::QueryRequest, serde_json::json!({"name": "nope"}), 1);
        consumer.dispatch(env, &ctx, || 2).await;
        let replies = ctx.replies.lock().await;
        let payload: QueryResponsePayload = serde_json::from_value(replies[0].payload.clone()).unwrap();
        assert!(payload.err.is_some());
    }

    #[tokio::test]
    async fn outbox_stream_ack_resolves_pending_producer_ack() {
        let (consumer, producer) = consumer();
        let producer_clone = Arc::clone(&producer);
        let waiter = tokio::spawn(async move { producer_clone.wait_for_ack(|| async { Ok(()) }).await });
        tokio::task::yield_now().await;

        let ctx = RecordingCtx {
            replies: AsyncMutex::new(Vec::new()),
        };
        let ack_payload = OutboxStreamAckPayload {
            all_ok: true,
            ok_indices: None,
        };
        let env = Envelope::new(
            Action::OutboxStreamAck,
            serde_json::to_value(ack_payload).unwrap(),
            1,
        );
        consumer.dispatch(env, &ctx, || 2).await;
        assert!(waiter.await.unwrap().is_ok());
    }
}
