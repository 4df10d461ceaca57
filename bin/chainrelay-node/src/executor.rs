//! Domain command executor wiring `BatchIterator`'s dispatched batches to
//! `NetworkAggregate::propose_add_blocks`, persisting the resulting event
//! and dequeuing the consumed blocks. Specified only by interface (the
//! CQRS command/event dispatch framework is out of core scope); this is
//! the concrete binding the node actually runs.

use std::sync::Arc;

use async_trait::async_trait;
use chainrelay_aggregates::{NetworkAggregate, RemoteHashSource, ADD_BLOCKS_EVENT};
use chainrelay_delivery::DeliveryLoop;
use chainrelay_ingest::batch_iterator::{BatchAck, BatchExecutor, BatchExecutorError};
use chainrelay_primitives::{BlockHash32, LightBlock, RequestId};
use chainrelay_queue::BlockQueue;
use chainrelay_store::EventStore;
use chainrelay_transport::RawTransport;
use parking_lot::Mutex;

pub struct NetworkBatchExecutor<T: RawTransport> {
    aggregate: Arc<Mutex<NetworkAggregate>>,
    queue: Arc<BlockQueue>,
    store: Arc<EventStore>,
    delivery: Arc<DeliveryLoop<T>>,
    remote: Arc<dyn RemoteHashSource + Send + Sync>,
    timestamp_fn: fn() -> u64,
}

impl<T: RawTransport> NetworkBatchExecutor<T> {
    pub fn new(
        aggregate: Arc<Mutex<NetworkAggregate>>,
        queue: Arc<BlockQueue>,
        store: Arc<EventStore>,
        delivery: Arc<DeliveryLoop<T>>,
        remote: Arc<dyn RemoteHashSource + Send + Sync>,
        timestamp_fn: fn() -> u64,
    ) -> Self {
        Self {
            aggregate,
            queue,
            store,
            delivery,
            remote,
            timestamp_fn,
        }
    }
}

#[async_trait]
impl<T: RawTransport> BatchExecutor for NetworkBatchExecutor<T> {
    async fn handle_batch(
        &self,
        batch: Vec<LightBlock>,
        request_id: RequestId,
        ack: BatchAck,
    ) -> Result<(), BatchExecutorError> {
        let timestamp_micros = (self.timestamp_fn)();
        let mut aggregate = self.aggregate.lock();

        let outcome = aggregate
            .propose_add_blocks(batch.clone(), request_id, timestamp_micros, self.remote.as_ref())
            .map_err(|err| BatchExecutorError::Rejected(err.to_string()))?;

        let hashes: Vec<BlockHash32> = batch.iter().map(|b| b.hash).collect();

        let Some(event) = outcome else {
            drop(aggregate);
            self.queue.dequeue_many(&hashes).ok();
            ack.ack();
            return Ok(());
        };

        let is_clean_extension = event.event_type == ADD_BLOCKS_EVENT;
        self.store
            .persist_aggregates_and_outbox(&mut [&mut *aggregate as &mut dyn chainrelay_aggregates::Aggregate])
            .map_err(|err| BatchExecutorError::Rejected(err.to_string()))?;
        drop(aggregate);

        if is_clean_extension {
            self.queue.dequeue_many(&hashes).ok();
        }
        self.delivery.notify_new_events();
        ack.ack();
        Ok(())
    }
}
