//! Bridges the synchronous [`RemoteHashSource`] contract `NetworkAggregate`
//! needs for reorg descent to the real, async `L1Client::get_block_hash`.
//! Requires a multi-thread tokio runtime, same as the teacher's
//! `Builder::new_multi_thread()` runtime used for `TaskManager`.

use std::sync::Arc;

use chainrelay_aggregates::RemoteHashSource;
use chainrelay_ingest::l1_client::L1Client;
use chainrelay_primitives::BlockHash32;
use tokio::runtime::Handle;

pub struct BlockingRemoteHashSource<C: L1Client> {
    client: Arc<C>,
    handle: Handle,
}

impl<C: L1Client> BlockingRemoteHashSource<C> {
    pub fn new(client: Arc<C>, handle: Handle) -> Self {
        Self { client, handle }
    }
}

impl<C: L1Client> RemoteHashSource for BlockingRemoteHashSource<C> {
    fn hash_at(&self, height: u64) -> Option<BlockHash32> {
        let client = self.client.clone();
        tokio::task::block_in_place(|| {
            self.handle
                .block_on(async move { client.get_block_hash(height).await })
        })
        .ok()
    }
}
