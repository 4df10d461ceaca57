use tokio::sync::watch;

/// Handed to a `spawn_critical` body so it can poll or await shutdown
/// without holding the sender half.
#[derive(Clone)]
pub struct ShutdownGuard(watch::Receiver<bool>);

impl ShutdownGuard {
    pub(crate) fn new(rx: watch::Receiver<bool>) -> Self {
        Self(rx)
    }

    pub fn should_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once shutdown has been requested. A loop body typically
    /// races this against its own work in a `tokio::select!`.
    pub async fn wait_for_shutdown(&mut self) {
        // `changed()` only resolves on a new value; if shutdown was
        // already requested before this guard started waiting, the
        // borrowed value is already `true` and there is nothing to wait
        // for.
        if *self.0.borrow() {
            return;
        }
        let _ = self.0.changed().await;
    }

    /// The underlying receiver, for loops (e.g. `DeliveryLoop::run`,
    /// `PullLoader::run`) whose `run` signature already takes a raw
    /// `watch::Receiver<bool>` directly.
    pub fn into_receiver(self) -> watch::Receiver<bool> {
        self.0
    }
}

/// Handle used to request shutdown of every task owned by a
/// [`crate::TaskManager`]. Cloning and sending from multiple call sites
/// (an RPC handler, a signal listener, a failed critical task) is fine --
/// `watch::Sender::send` is idempotent in effect once the value is `true`.
#[derive(Clone)]
pub struct ShutdownSignal(watch::Sender<bool>);

impl ShutdownSignal {
    pub(crate) fn new(tx: watch::Sender<bool>) -> Self {
        Self(tx)
    }

    pub fn send(&self) {
        let _ = self.0.send(true);
    }
}
