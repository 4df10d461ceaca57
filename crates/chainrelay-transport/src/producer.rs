use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chainrelay_common::timer::ExponentialTimer;
use chainrelay_primitives::envelope::ENVELOPE_OVERHEAD_BYTES;
use chainrelay_primitives::{Action, Envelope};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::TransportError;

/// Transport-specific half of a [`Producer`]: raw framed send plus a
/// liveness check of the underlying connection. Concrete producers
/// (HTTP/WS/IPC) implement only this; the ACK-correlation and heartbeat
/// state machine above it is shared.
///
/// Grounded on `crates/btcio/src/broadcaster/handle.rs`'s split between a
/// thin handle (here, [`Producer`]) and a transport-owning task loop
/// (here, `RawTransport` impls) -- generalized from "broadcast a signed
/// L1 tx" to "frame-send an arbitrary wire envelope".
#[async_trait]
pub trait RawTransport: Send + Sync {
    async fn raw_send(&self, json: &[u8]) -> Result<(), TransportError>;
    fn is_transport_connected(&self) -> bool;
}

#[derive(Clone, Debug)]
pub struct ProducerConfig {
    pub max_message_bytes: usize,
    pub ack_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_multiplier: u64,
    pub heartbeat_max_interval: Duration,
    pub heartbeat_timeout: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: 10 * 1024 * 1024,
            ack_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_millis(5_000),
            heartbeat_multiplier: 2,
            heartbeat_max_interval: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_secs(30),
        }
    }
}

/// Owns a connection, maintains liveness via a heartbeat, frames
/// envelopes, enforces the size cap, and correlates a single outstanding
/// ACK. Generic over the transport-specific raw send (spec.md §4.7).
pub struct Producer<T: RawTransport> {
    transport: Arc<T>,
    config: ProducerConfig,
    ack_slot: tokio::sync::Mutex<Option<oneshot::Sender<serde_json::Value>>>,
    last_pong: Mutex<Option<Instant>>,
    heartbeat_timer: Mutex<ExponentialTimer>,
    heartbeat_shutdown: tokio::sync::watch::Sender<bool>,
    heartbeat_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<T: RawTransport + 'static> Producer<T> {
    pub fn new(transport: Arc<T>, config: ProducerConfig) -> Arc<Self> {
        let timer = ExponentialTimer::new(
            config.heartbeat_interval,
            config.heartbeat_max_interval,
            config.heartbeat_multiplier,
            1,
        );
        let (heartbeat_shutdown, _) = tokio::sync::watch::channel(false);
        Arc::new(Self {
            transport,
            config,
            ack_slot: tokio::sync::Mutex::new(None),
            last_pong: Mutex::new(None),
            heartbeat_timer: Mutex::new(timer),
            heartbeat_shutdown,
            heartbeat_handle: Mutex::new(None),
        })
    }

    /// Serializes once, enforces the size cap, and hands the framed bytes
    /// to the transport. Fire-and-forget: callers that need delivery
    /// confirmation wrap this in [`Producer::wait_for_ack`].
    pub async fn send_message(&self, env: &Envelope) -> Result<(), TransportError> {
        let json = serde_json::to_vec(env)?;
        let size = json.len() + ENVELOPE_OVERHEAD_BYTES;
        if size > self.config.max_message_bytes {
            return Err(TransportError::EnvelopeTooLarge {
                size,
                max: self.config.max_message_bytes,
            });
        }
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.transport.raw_send(&json).await
    }

    /// Installs a fresh ACK slot, invokes `executor` (expected to call
    /// [`Producer::send_message`] itself), and waits up to `ack_timeout`
    /// for [`Producer::resolve_ack`] to be called by a [`crate::Consumer`].
    /// Only one ACK may be outstanding at a time.
    pub async fn wait_for_ack<F, Fut>(&self, executor: F) -> Result<serde_json::Value, TransportError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<(), TransportError>>,
    {
        let (tx, rx) = oneshot::channel();
        {
            let mut slot = self.ack_slot.lock().await;
            if slot.is_some() {
                return Err(TransportError::AckAlreadyPending);
            }
            *slot = Some(tx);
        }

        if let Err(err) = executor().await {
            self.ack_slot.lock().await.take();
            return Err(err);
        }

        let outcome = tokio::time::timeout(self.config.ack_timeout, rx).await;
        self.ack_slot.lock().await.take();
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(TransportError::Destroyed),
            Err(_) => Err(TransportError::AckTimeout),
        }
    }

    /// Resolves the pending ACK slot, if any. Called by a [`crate::Consumer`]
    /// on an incoming `OutboxStreamAck` envelope.
    pub async fn resolve_ack(&self, payload: serde_json::Value) {
        if let Some(tx) = self.ack_slot.lock().await.take() {
            let _ = tx.send(payload);
        }
    }

    /// Records a received Pong and resets the heartbeat backoff to its
    /// floor interval.
    pub fn on_pong(&self) {
        *self.last_pong.lock() = Some(Instant::now());
        self.heartbeat_timer.lock().reset();
    }

    /// True iff the underlying transport is connected and either no pong
    /// has ever been received (warm, not yet timed out) or the most
    /// recent pong is within `heartbeat_timeout`.
    pub fn is_connected(&self) -> bool {
        if !self.transport.is_transport_connected() {
            return false;
        }
        match *self.last_pong.lock() {
            None => true,
            Some(t) => t.elapsed() < self.config.heartbeat_timeout,
        }
    }

    /// Short-polls [`Producer::is_connected`] at ~25ms granularity.
    pub async fn wait_for_online(&self, timeout: Duration) -> Result<(), TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_connected() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(TransportError::OnlineTimeout);
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Spawns the heartbeat task: each tick sends a Ping (skipped if the
    /// transport isn't connected) on an exponentially-backing-off
    /// interval, reset to the floor by [`Producer::on_pong`].
    pub fn start_heartbeat(self: &Arc<Self>, timestamp_fn: impl Fn() -> u64 + Send + Sync + 'static) {
        let this = Arc::clone(self);
        let mut shutdown = self.heartbeat_shutdown.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                let interval = this.heartbeat_timer.lock().current();
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
                if *shutdown.borrow() {
                    break;
                }
                if this.transport.is_transport_connected() {
                    let env = Envelope::new(Action::Ping, serde_json::json!({}), timestamp_fn());
                    if let Err(err) = this.send_message(&env).await {
                        debug!(%err, "heartbeat ping send failed");
                    }
                } else {
                    warn!("skipping heartbeat ping, transport not connected");
                }
                this.heartbeat_timer.lock().backoff();
            }
        });
        *self.heartbeat_handle.lock() = Some(handle);
    }

    pub fn stop_heartbeat(&self) {
        let _ = self.heartbeat_shutdown.send(true);
        if let Some(handle) = self.heartbeat_handle.lock().take() {
            handle.abort();
        }
    }

    /// Stops the heartbeat and rejects any pending ACK with `Destroyed`.
    pub async fn destroy(&self) {
        self.stop_heartbeat();
        if let Some(tx) = self.ack_slot.lock().await.take() {
            drop(tx); // dropping the sender rejects the waiter's recv()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

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
    async fn send_message_rejects_oversized_envelope() {
        let mut config = ProducerConfig::default();
        config.max_message_bytes = 10;
        let p = Producer::new(
            Arc::new(StubTransport {
                connected: AtomicBool::new(true),
            }),
            config,
        );
        let env = Envelope::new(Action::Ping, serde_json::json!({"a": "b"}), 1);
        let err = p.send_message(&env).await.unwrap_err();
        assert!(matches!(err, TransportError::EnvelopeTooLarge { .. }));
        drop(p);
    }

    #[tokio::test]
    async fn send_message_fails_when_not_connected() {
        let p = producer(false);
        let env = Envelope::new(Action::Ping, serde_json::json!({}), 1);
        let err = p.send_message(&env).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[tokio::test]
    async fn wait_for_ack_rejects_second_concurrent_call() {
        let p = producer(true);
        let p2 = Arc::clone(&p);
        let handle = tokio::spawn(async move { p2.wait_for_ack(|| async { Ok(()) }).await });
        tokio::task::yield_now().await;
        let second = p.wait_for_ack(|| async { Ok(()) }).await;
        assert!(matches!(second, Err(TransportError::AckAlreadyPending)));
        p.resolve_ack(serde_json::json!({"ok": true})).await;
        let first = handle.await.unwrap();
        assert!(first.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_ack_times_out_without_resolution() {
        let mut config = ProducerConfig::default();
        config.ack_timeout = Duration::from_millis(10);
        let p = Producer::new(
            Arc::new(StubTransport {
                connected: AtomicBool::new(true),
            }),
            config,
        );
        let result = p.wait_for_ack(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(TransportError::AckTimeout)));
    }

    #[test]
    fn is_connected_is_warm_before_first_pong() {
        let p = producer(true);
        assert!(p.is_connected());
    }

    #[test]
    fn is_connected_false_when_transport_down() {
        let p = producer(false);
        assert!(!p.is_connected());
    }
}
