use std::collections::HashMap;

use borsh::{BorshDeserialize, BorshSerialize};
use chainrelay_primitives::{BlockHash32, Event, RequestId, Snapshot};

use crate::aggregate::Aggregate;
use crate::error::AggregateError;

pub const MEMPOOL_TX_ADDED_EVENT: &str = "MempoolTxAdded";
pub const MEMPOOL_TX_REMOVED_EVENT: &str = "MempoolTxRemoved";

#[derive(BorshSerialize, BorshDeserialize)]
struct TxAddedPayload {
    txid: BlockHash32,
    raw: Vec<u8>,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct TxRemovedPayload {
    txid: BlockHash32,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct MempoolSnapshotPayload {
    entries: Vec<(BlockHash32, Vec<u8>)>,
}

/// Tracks unconfirmed transactions independently of the chain tip.
///
/// The `Aggregate` trait makes no assumption that an aggregate owns a
/// [`chainrelay_chain::ChainIndex`] -- `last_block_height` only needs to
/// reflect the height through which this aggregate's events have been
/// applied, which for the mempool is simply the height carried on its
/// most recent event. Kept deliberately minimal: mempool eviction policy
/// (fee-based replacement, expiry) is out of scope, see spec.md §1
/// Non-goals.
pub struct MempoolAggregate {
    aggregate_id: String,
    version: u64,
    last_block_height: i64,
    unsaved_events: Vec<Event>,
    entries: HashMap<BlockHash32, Vec<u8>>,
}

impl MempoolAggregate {
    pub fn new(aggregate_id: impl Into<String>) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            version: 0,
            last_block_height: -1,
            unsaved_events: Vec::new(),
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, txid: &BlockHash32) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn propose_add_tx(
        &mut self,
        txid: BlockHash32,
        raw: Vec<u8>,
        request_id: RequestId,
        timestamp_micros: u64,
    ) -> Option<Event> {
        if self.entries.contains_key(&txid) {
            return None;
        }
        let payload = borsh::to_vec(&TxAddedPayload { txid, raw }).expect("borsh encode");
        let event = self.build_event(MEMPOOL_TX_ADDED_EVENT, request_id, timestamp_micros, payload);
        self.apply(event.clone()).expect("self-constructed event always applies cleanly");
        Some(event)
    }

    pub fn propose_remove_tx(&mut self, txid: BlockHash32, request_id: RequestId, timestamp_micros: u64) -> Option<Event> {
        if !self.entries.contains_key(&txid) {
            return None;
        }
        let payload = borsh::to_vec(&TxRemovedPayload { txid }).expect("borsh encode");
        let event = self.build_event(MEMPOOL_TX_REMOVED_EVENT, request_id, timestamp_micros, payload);
        self.apply(event.clone()).expect("self-constructed event always applies cleanly");
        Some(event)
    }

    fn build_event(&self, event_type: &str, request_id: RequestId, timestamp_micros: u64, payload: Vec<u8>) -> Event {
        Event {
            aggregate_id: self.aggregate_id.clone(),
            version: self.version + 1,
            request_id,
            block_height: None,
            timestamp_micros,
            event_type: event_type.to_string(),
            payload,
            is_compressed: false,
        }
    }

    pub fn to_snapshot(&self, at_height: i64) -> Snapshot {
        let payload = MempoolSnapshotPayload {
            entries: self.entries.iter().map(|(k, v)| (*k, v.clone())).collect(),
        };
        let bytes = borsh::to_vec(&payload).expect("in-memory borsh encode cannot fail");
        Snapshot {
            aggregate_id: self.aggregate_id.clone(),
            version: self.version,
            block_height: at_height,
            payload: bytes,
            is_compressed: false,
        }
    }

    pub fn from_snapshot(aggregate_id: impl Into<String>, snapshot: &Snapshot) -> Result<Self, AggregateError> {
        let payload = MempoolSnapshotPayload::try_from_slice(&snapshot.payload)?;
        Ok(Self {
            aggregate_id: aggregate_id.into(),
            version: snapshot.version,
            last_block_height: snapshot.block_height,
            unsaved_events: Vec::new(),
            entries: payload.entries.into_iter().collect(),
        })
    }
}

impl Aggregate for MempoolAggregate {
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
            return Ok(());
        }
        if event.version != self.version + 1 {
            return Err(AggregateError::VersionGap {
                expected: self.version + 1,
                got: event.version,
            });
        }

        match event.event_type.as_str() {
            MEMPOOL_TX_ADDED_EVENT => {
                let payload = TxAddedPayload::try_from_slice(&event.payload)?;
                self.entries.insert(payload.txid, payload.raw);
            }
            MEMPOOL_TX_REMOVED_EVENT => {
                let payload = TxRemovedPayload::try_from_slice(&event.payload)?;
                self.entries.remove(&payload.txid);
            }
            other => return Err(AggregateError::UnknownEventType(other.to_string())),
        }

        if let Some(height) = event.block_height {
            self.last_block_height = height as i64;
        }
        self.version = event.version;
        self.unsaved_events.push(event);
        Ok(())
    }

    fn clear_unsaved_events(&mut self) {
        self.unsaved_events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(n: u8) -> BlockHash32 {
        BlockHash32([n; 32])
    }

    #[test]
    fn add_and_remove_tx_round_trip() {
        let mut mp = MempoolAggregate::new("mempool");
        let id = tx(1);
        mp.propose_add_tx(id, vec![1, 2, 3], RequestId::new(), 1).unwrap();
        assert!(mp.contains(&id));
        assert_eq!(mp.version(), 1);

        mp.propose_remove_tx(id, RequestId::new(), 2).unwrap();
        assert!(!mp.contains(&id));
        assert_eq!(mp.version(), 2);
    }

    #[test]
    fn adding_duplicate_tx_is_a_no_op() {
        let mut mp = MempoolAggregate::new("mempool");
        let id = tx(2);
        mp.propose_add_tx(id, vec![], RequestId::new(), 1).unwrap();
        let second = mp.propose_add_tx(id, vec![], RequestId::new(), 2);
        assert!(second.is_none());
        assert_eq!(mp.version(), 1);
    }

    #[test]
    fn removing_unknown_tx_is_a_no_op() {
        let mut mp = MempoolAggregate::new("mempool");
        assert!(mp.propose_remove_tx(tx(9), RequestId::new(), 1).is_none());
        assert_eq!(mp.version(), 0);
    }

    #[test]
    fn snapshot_round_trips() {
        let mut mp = MempoolAggregate::new("mempool");
        mp.propose_add_tx(tx(3), vec![9, 9], RequestId::new(), 1).unwrap();
        let snap = mp.to_snapshot(5);
        let restored = MempoolAggregate::from_snapshot("mempool", &snap).unwrap();
        assert_eq!(restored.version(), mp.version());
        assert!(restored.contains(&tx(3)));
    }
}
