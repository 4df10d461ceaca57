use std::sync::Arc;

use async_trait::async_trait;
use chainrelay_primitives::{LightBlock, RequestId};
use chainrelay_queue::BlockQueue;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;

#[derive(Debug, Error)]
pub enum BatchExecutorError {
    #[error("batch executor rejected batch: {0}")]
    Rejected(String),
}

/// Handle to the current batch's completion signal, handed to the executor
/// so it (or downstream machinery, once events are durably persisted) can
/// acknowledge completion. Spec.md §4.4: "The signal's resolver is exposed
/// so the executor ... can acknowledge batch completion."
#[derive(Clone)]
pub struct BatchAck(Arc<Notify>);

impl BatchAck {
    pub fn ack(&self) {
        self.0.notify_one();
    }
}

/// Domain command executor collaborator -- specified only by interface
/// (spec.md §1 excludes "the CQRS command/event dispatch framework" from
/// core scope).
#[async_trait]
pub trait BatchExecutor: Send + Sync {
    async fn handle_batch(
        &self,
        batch: Vec<LightBlock>,
        request_id: RequestId,
        ack: BatchAck,
    ) -> Result<(), BatchExecutorError>;
}

#[derive(Debug, PartialEq, Eq)]
pub enum IteratorTickOutcome {
    Idle,
    Dispatched,
    ExecutorRejected,
}

/// Pulls byte-bounded batches from [`BlockQueue`], invokes a domain
/// executor, and awaits an ACK-style completion signal before advancing.
/// Grounded on the producer/consumer handshake shape in
/// `btcio/src/broadcaster/handle.rs`, adapted from a single-inflight
/// broadcast ack to a single-inflight batch-processed ack.
pub struct BatchIterator {
    queue: Arc<BlockQueue>,
    executor: Arc<dyn BatchExecutor>,
    iterator_budget_bytes: u64,
    /// Current batch-processed signal. Starts pre-resolved (a permit is
    /// already banked) so the first `tick` doesn't block on nothing ever
    /// having run.
    signal: Mutex<Arc<Notify>>,
}

impl BatchIterator {
    pub fn new(queue: Arc<BlockQueue>, executor: Arc<dyn BatchExecutor>, iterator_budget_bytes: u64) -> Self {
        let initial = Arc::new(Notify::new());
        initial.notify_one();
        Self {
            queue,
            executor,
            iterator_budget_bytes,
            signal: Mutex::new(initial),
        }
    }

    pub async fn tick(&self) -> IteratorTickOutcome {
        let previous_signal = self.signal.lock().clone();
        previous_signal.notified().await;

        let batch = self.queue.get_batch_up_to_size(self.iterator_budget_bytes);
        if batch.is_empty() {
            // Re-arm a pre-resolved signal so the next tick doesn't block
            // on a signal nobody will ever resolve.
            let idle = Arc::new(Notify::new());
            idle.notify_one();
            *self.signal.lock() = idle;
            return IteratorTickOutcome::Idle;
        }

        let fresh = Arc::new(Notify::new());
        *self.signal.lock() = fresh.clone();
        let request_id = RequestId::new();

        match self
            .executor
            .handle_batch(batch, request_id, BatchAck(fresh.clone()))
            .await
        {
            Ok(()) => IteratorTickOutcome::Dispatched,
            Err(err) => {
                tracing::warn!(%err, "batch executor rejected batch, resolving signal for retry");
                fresh.notify_one();
                IteratorTickOutcome::ExecutorRejected
            }
        }
    }
}
