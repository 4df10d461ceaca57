use borsh::{BorshDeserialize, BorshSerialize};
use chainrelay_chain::ChainIndex;
use chainrelay_primitives::{BlockHash32, Event, LightBlock, RequestId, Snapshot};

use crate::aggregate::Aggregate;
use crate::error::AggregateError;

pub const ADD_BLOCKS_EVENT: &str = "AddBlocks";
pub const NETWORK_REORGANIZED_EVENT: &str = "NetworkReorganized";
pub const NETWORK_CLEARED_EVENT: &str = "NetworkCleared";

/// Supplies canonical hashes for reorg descent. The Network aggregate has
/// no network access of its own (spec.md §1 excludes the L1 RPC/P2P
/// transport from core scope); the command-handling layer that owns both
/// the aggregate and an `L1Client` passes one of these in.
pub trait RemoteHashSource {
    fn hash_at(&self, height: u64) -> Option<BlockHash32>;
}

#[derive(BorshSerialize, BorshDeserialize)]
struct AddBlocksPayload {
    blocks: Vec<LightBlock>,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct NetworkReorganizedPayload {
    block_height: i64,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct NetworkSnapshotPayload {
    last_block_height: i64,
    last_block_hash: BlockHash32,
    max_chain_size: usize,
    base_block_height: i64,
    chain_blocks: Vec<LightBlock>,
}

/// The Network aggregate: owns the authoritative [`ChainIndex`] and emits
/// `AddBlocks` / `NetworkReorganized` / `NetworkCleared` events as the
/// chain advances or reorganizes. Grounded on
/// `consensus-logic/src/worker.rs`'s `WorkerState`/`SyncAction` dispatch,
/// reshaped into the apply-based aggregate contract spec.md §3 requires.
pub struct NetworkAggregate {
    aggregate_id: String,
    version: u64,
    last_block_height: i64,
    last_block_hash: BlockHash32,
    unsaved_events: Vec<Event>,
    chain: ChainIndex,
}

impl NetworkAggregate {
    pub fn new(aggregate_id: impl Into<String>, max_chain_size: usize, base_block_height: i64) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            version: 0,
            last_block_height: base_block_height,
            last_block_hash: BlockHash32::ZERO,
            unsaved_events: Vec::new(),
            chain: ChainIndex::new(max_chain_size, base_block_height),
        }
    }

    pub fn chain(&self) -> &ChainIndex {
        &self.chain
    }

    pub fn last_block_hash(&self) -> BlockHash32 {
        self.last_block_hash
    }

    pub fn to_snapshot(&self, at_height: i64) -> Result<Snapshot, AggregateError> {
        let payload = NetworkSnapshotPayload {
            last_block_height: self.last_block_height,
            last_block_hash: self.last_block_hash,
            max_chain_size: self.chain.max_size(),
            base_block_height: self.chain.base_block_height(),
            chain_blocks: self.chain.to_array(),
        };
        let bytes = borsh::to_vec(&payload).expect("in-memory borsh encode cannot fail");
        Ok(Snapshot {
            aggregate_id: self.aggregate_id.clone(),
            version: self.version,
            block_height: at_height,
            payload: bytes,
            is_compressed: false,
        })
    }

    pub fn from_snapshot(aggregate_id: impl Into<String>, snapshot: &Snapshot) -> Result<Self, AggregateError> {
        let payload = NetworkSnapshotPayload::try_from_slice(&snapshot.payload)?;
        Ok(Self {
            aggregate_id: aggregate_id.into(),
            version: snapshot.version,
            last_block_height: payload.last_block_height,
            last_block_hash: payload.last_block_hash,
            unsaved_events: Vec::new(),
            chain: ChainIndex::from_array(payload.max_chain_size, payload.base_block_height, payload.chain_blocks),
        })
    }

    /// Proposes adding `blocks` to the chain. Returns `Ok(None)` if the
    /// batch is an idempotent no-op (its last block's hash already equals
    /// `lastBlockHash`, per spec.md §8's round-trip property). On a clean
    /// extension, returns the `AddBlocks` event, already applied. On a
    /// fork, descends via `remote` to find the fork point and returns a
    /// `NetworkReorganized` event instead, applied in its place -- the
    /// caller is expected to retry `propose_add_blocks` with the same
    /// batch on its next command cycle.
    pub fn propose_add_blocks(
        &mut self,
        blocks: Vec<LightBlock>,
        request_id: RequestId,
        timestamp_micros: u64,
        remote: &dyn RemoteHashSource,
    ) -> Result<Option<Event>, AggregateError> {
        let Some(last) = blocks.last() else {
            return Err(AggregateError::EmptyBatch);
        };
        if last.hash == self.last_block_hash {
            return Ok(None);
        }

        if self.chain.add_blocks(&blocks) {
            let payload = borsh::to_vec(&AddBlocksPayload { blocks }).expect("borsh encode");
            let event = self.build_event(ADD_BLOCKS_EVENT, request_id, timestamp_micros, Some(last.height), payload);
            self.apply(event.clone())?;
            return Ok(Some(event));
        }

        let fork_height = self.descend_to_fork_point(remote)?;
        self.chain.truncate_to(fork_height);
        let payload = borsh::to_vec(&NetworkReorganizedPayload {
            block_height: fork_height,
        })
        .expect("borsh encode");
        let event = self.build_event(
            NETWORK_REORGANIZED_EVENT,
            request_id,
            timestamp_micros,
            Some(fork_height.max(0) as u64),
            payload,
        );
        self.apply(event.clone())?;
        Ok(Some(event))
    }

    pub fn propose_clear(&mut self, request_id: RequestId, timestamp_micros: u64) -> Event {
        let event = self.build_event(NETWORK_CLEARED_EVENT, request_id, timestamp_micros, None, Vec::new());
        self.apply(event.clone())
            .expect("self-constructed event always applies cleanly");
        event
    }

    fn build_event(
        &self,
        event_type: &str,
        request_id: RequestId,
        timestamp_micros: u64,
        block_height: Option<u64>,
        payload: Vec<u8>,
    ) -> Event {
        Event {
            aggregate_id: self.aggregate_id.clone(),
            version: self.version + 1,
            request_id,
            block_height,
            timestamp_micros,
            event_type: event_type.to_string(),
            payload,
            is_compressed: false,
        }
    }

    /// Walks back from the current tip comparing local vs remote hashes
    /// until it finds a match, or reaches the genesis sentinel without
    /// one. Grounded on `btcio/src/reader/reorg.rs`'s `find_fork_point_
    /// until`, generalized to the aggregate's own retained chain instead
    /// of a bare `VecDeque<BlockHash>`.
    fn descend_to_fork_point(&self, remote: &dyn RemoteHashSource) -> Result<i64, AggregateError> {
        let base = self.chain.base_block_height();
        let mut height = self.chain.tip().map(|b| b.height as i64).unwrap_or(base);
        while height > base {
            if let Some(local) = self.chain.find_by_height(height as u64) {
                if remote.hash_at(height as u64) == Some(local.hash) {
                    return Ok(height);
                }
            }
            height -= 1;
        }
        Err(AggregateError::GenesisReached)
    }
}

impl Aggregate for NetworkAggregate {
    fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn last_block_height(&self) -> i64 {
        self.last_block_height
    }

    fn unsaved_events(&self) -> &[Event] {
        &self.unsaved_events
    }

    fn apply(&mut self, event: Event) -> Result<(), AggregateError> {
        if event.aggregate_id != self.aggregate_id {
            return Err(AggregateError::WrongAggregate {
                event_aggregate_id: event.aggregate_id,
                self_aggregate_id: self.aggregate_id.clone(),
            });
        }
        if event.version <= self.version {
            // Already applied; idempotent no-op for replay duplicates.
            return Ok(());
        }
        if event.version != self.version + 1 {
            return Err(AggregateError::VersionGap {
                expected: self.version + 1,
                got: event.version,
            });
        }

        match event.event_type.as_str() {
            ADD_BLOCKS_EVENT => {
                let payload = AddBlocksPayload::try_from_slice(&event.payload)?;
                if let Some(last) = payload.blocks.last() {
                    if last.hash != self.last_block_hash {
                        self.chain.add_blocks(&payload.blocks);
                        self.last_block_hash = last.hash;
                        self.last_block_height = last.height as i64;
                    }
                }
            }
            NETWORK_REORGANIZED_EVENT => {
                let payload = NetworkReorganizedPayload::try_from_slice(&event.payload)?;
                self.chain.truncate_to(payload.block_height);
                self.last_block_height = payload.block_height;
                self.last_block_hash = self
                    .chain
                    .tip()
                    .map(|b| b.hash)
                    .unwrap_or(BlockHash32::ZERO);
            }
            NETWORK_CLEARED_EVENT => {
                let base = self.chain.base_block_height();
                self.chain.truncate_to(base);
                self.last_block_height = base;
                self.last_block_hash = BlockHash32::ZERO;
            }
            other => return Err(AggregateError::UnknownEventType(other.to_string())),
        }

        self.version = event.version;
        self.unsaved_events.push(event);
        Ok(())
    }

    fn clear_unsaved_events(&mut self) {
        self.unsaved_events.clear();
    }
}
