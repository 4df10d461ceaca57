use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::hash::BlockHash32;

/// A transaction id, distinct type alias over the same 32-byte shape as a
/// block hash (mirrors the teacher's practice of using the same `Buf32`
/// wrapper for differently-named hash domains, see `l1/block.rs`).
pub type TxId = BlockHash32;

/// An immutable block as ingested from L1, full transaction id list
/// included. Height/hash/previousHash form the chain-sequencing contract
/// used by [`crate::block::Block::extends`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub height: u64,
    pub hash: BlockHash32,
    pub previous_hash: BlockHash32,
    pub merkle_root: BlockHash32,
    pub size: u64,
    pub txids: Vec<TxId>,
    /// Opaque payload fields carried along without interpretation by the
    /// core pipeline (raw header bytes, timestamp, etc).
    pub raw_header: Vec<u8>,
}

impl Block {
    /// Returns true iff `self` could validly follow `prev` in a chain:
    /// `height == prev.height + 1 && previous_hash == prev.hash`.
    pub fn extends(&self, prev: &Block) -> bool {
        self.height == prev.height + 1 && self.previous_hash == prev.hash
    }

    pub fn to_light(&self) -> LightBlock {
        LightBlock {
            height: self.height,
            hash: self.hash,
            previous_hash: self.previous_hash,
            merkle_root: self.merkle_root,
            size: self.size,
            txids: self.txids.clone(),
        }
    }
}

/// The [`Block`] minus full transaction bodies -- only txids retained.
/// Used by the in-memory `ChainIndex` and persisted in aggregate event
/// payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct LightBlock {
    pub height: u64,
    pub hash: BlockHash32,
    pub previous_hash: BlockHash32,
    pub merkle_root: BlockHash32,
    pub size: u64,
    pub txids: Vec<TxId>,
}

impl LightBlock {
    pub fn extends(&self, prev: &LightBlock) -> bool {
        self.height == prev.height + 1 && self.previous_hash == prev.hash
    }
}
