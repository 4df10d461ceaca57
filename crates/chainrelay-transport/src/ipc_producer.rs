use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::Mutex;

use crate::error::TransportError;
use crate::producer::RawTransport;

/// Newline-delimited JSON over a Unix domain socket. Used for same-host
/// sidecar delivery where a full HTTP/WS round trip is unnecessary
/// overhead.
pub struct IpcTransport {
    path: PathBuf,
    stream: Mutex<Option<UnixStream>>,
    connected: AtomicBool,
}

impl IpcTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stream: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    async fn ensure_connected(&self, guard: &mut Option<UnixStream>) -> Result<(), TransportError> {
        if guard.is_some() {
            return Ok(());
        }
        let stream = UnixStream::connect(&self.path)
            .await
            .map_err(|err| TransportError::Send(err.to_string()))?;
        *guard = Some(stream);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl RawTransport for IpcTransport {
    async fn raw_send(&self, json: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.stream.lock().await;
        self.ensure_connected(&mut guard).await?;
        let stream = guard.as_mut().expect("just connected");

        let mut framed = Vec::with_capacity(json.len() + 1);
        framed.extend_from_slice(json);
        framed.push(b'\n');

        if let Err(err) = stream.write_all(&framed).await {
            *guard = None;
            self.connected.store(false, Ordering::SeqCst);
            return Err(TransportError::Send(err.to_string()));
        }
        Ok(())
    }

    fn is_transport_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
