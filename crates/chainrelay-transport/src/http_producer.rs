use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::Client;

use crate::error::TransportError;
use crate::producer::RawTransport;

/// Frames envelopes as HTTP POST bodies to a configured peer URL.
/// Liveness is simply "has the last POST succeeded" -- HTTP has no
/// persistent connection to probe, unlike WS/IPC, so `is_transport_
/// connected` degrades to that last-observed-result flag instead of an
/// actual socket check.
pub struct HttpTransport {
    client: Client,
    url: String,
    last_send_ok: AtomicBool,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            last_send_ok: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl RawTransport for HttpTransport {
    async fn raw_send(&self, json: &[u8]) -> Result<(), TransportError> {
        let result = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .body(json.to_vec())
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                self.last_send_ok.store(true, Ordering::SeqCst);
                Ok(())
            }
            Ok(resp) => {
                self.last_send_ok.store(false, Ordering::SeqCst);
                Err(TransportError::Send(format!("peer responded {}", resp.status())))
            }
            Err(err) => {
                self.last_send_ok.store(false, Ordering::SeqCst);
                Err(TransportError::Send(err.to_string()))
            }
        }
    }

    fn is_transport_connected(&self) -> bool {
        self.last_send_ok.load(Ordering::SeqCst)
    }
}
