use async_trait::async_trait;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::rpc_params;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::TransportError;
use crate::producer::RawTransport;

/// WebSocket raw transport. Grounded on `crates/common/src/ws_client.rs`'s
/// `ManagedWsClient` (connection liveness via `WsClient::is_connected`,
/// recreate-on-disconnect instead of pooling many clients -- a single
/// producer only ever needs one live socket at a time, unlike the
/// teacher's multi-consumer connection pool).
pub struct WsTransport {
    url: String,
    client: RwLock<Option<WsClient>>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: RwLock::new(None),
        }
    }

    async fn ensure_connected(&self) -> Result<(), TransportError> {
        {
            let guard = self.client.read().await;
            if let Some(client) = guard.as_ref() {
                if client.is_connected() {
                    return Ok(());
                }
            }
        }
        let client = WsClientBuilder::default()
            .build(&self.url)
            .await
            .map_err(|err| TransportError::Send(err.to_string()))?;
        *self.client.write().await = Some(client);
        Ok(())
    }
}

#[async_trait]
impl RawTransport for WsTransport {
    async fn raw_send(&self, json: &[u8]) -> Result<(), TransportError> {
        self.ensure_connected().await?;
        let guard = self.client.read().await;
        let client = guard.as_ref().ok_or(TransportError::NotConnected)?;
        let value: serde_json::Value =
            serde_json::from_slice(json).map_err(|err| TransportError::Send(err.to_string()))?;
        client
            .request::<serde_json::Value, _>("push_envelope", rpc_params![value])
            .await
            .map_err(|err| {
                warn!(%err, "ws producer push_envelope failed");
                TransportError::Send(err.to_string())
            })?;
        Ok(())
    }

    fn is_transport_connected(&self) -> bool {
        self.client
            .try_read()
            .ok()
            .and_then(|guard| guard.as_ref().map(|c| c.is_connected()))
            .unwrap_or(false)
    }
}
