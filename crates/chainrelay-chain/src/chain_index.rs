use std::collections::VecDeque;

use chainrelay_primitives::LightBlock;

use crate::error::ChainIndexError;

/// In-memory doubly-linked-sequence chain tail.
///
/// Grounded on `consensus-logic/src/csm/chain_tracker.rs`'s
/// `IndexableBlock`/`IndexedBlockTable` pair and `btcio/src/reader/
/// state.rs`'s `ReaderState`, which already keeps a bounded `VecDeque` of
/// recent block hashes indexed by arithmetic offset from the deepest
/// retained height. Since chain heights are always contiguous (an
/// invariant this type enforces), that arithmetic offset from the front
/// element's height *is* an O(1) height -> node map -- no separate
/// `HashMap` is needed, unlike the teacher's height-keyed `HashMap` in
/// `IndexedBlockTable` (which has to support non-contiguous ranges that
/// chainrelay's contiguity invariant rules out).
///
/// A real doubly-linked list of heap nodes is not the idiomatic Rust
/// rendition of "doubly-linked sequence" here: it buys nothing a `VecDeque`
/// doesn't already give for this contiguous-heights, FIFO-eviction,
/// truncate-from-the-back access pattern, while adding unsafe code or
/// `Rc<RefCell<_>>` overhead for no benefit.
#[derive(Debug)]
pub struct ChainIndex {
    max_size: usize,
    /// Sentinel height below which truncation is rejected outright.
    base_block_height: i64,
    /// Ascending by height, strictly contiguous.
    blocks: VecDeque<LightBlock>,
}

impl ChainIndex {
    pub fn new(max_size: usize, base_block_height: i64) -> Self {
        assert!(max_size > 0, "ChainIndex: max_size must be positive");
        Self {
            max_size,
            base_block_height,
            blocks: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn base_block_height(&self) -> i64 {
        self.base_block_height
    }

    /// The current chain tip, if any.
    pub fn tip(&self) -> Option<&LightBlock> {
        self.blocks.back()
    }

    /// Height of the earliest block still retained, or the sentinel if
    /// empty.
    pub fn head_height(&self) -> i64 {
        self.blocks
            .front()
            .map(|b| b.height as i64)
            .unwrap_or(self.base_block_height)
    }

    /// Contract check without mutation: would `height`/`prev_hash` validly
    /// extend the current tip?
    pub fn validate_next_block(
        &self,
        height: u64,
        prev_hash: chainrelay_primitives::BlockHash32,
    ) -> bool {
        match self.tip() {
            None => true,
            Some(tip) => height == tip.height + 1 && prev_hash == tip.hash,
        }
    }

    /// Appends one block to the tip. Fails without mutation if the block
    /// does not extend the current tip (for an empty chain, any block is
    /// accepted as the new head). Evicts the head if this pushes the chain
    /// past `max_size`.
    pub fn add_block(&mut self, block: LightBlock) -> bool {
        if !self.validate_next_block(block.height, block.previous_hash) {
            return false;
        }
        self.blocks.push_back(block);
        if self.blocks.len() > self.max_size {
            self.blocks.pop_front();
        }
        true
    }

    /// Appends a batch atomically: the whole batch is validated for
    /// internal consecutiveness, and against the current tip, before any
    /// insertion takes place.
    pub fn add_blocks(&mut self, blocks: &[LightBlock]) -> bool {
        if blocks.is_empty() {
            return true;
        }
        if !self.validate_next_block(blocks[0].height, blocks[0].previous_hash) {
            return false;
        }
        for pair in blocks.windows(2) {
            if !pair[1].extends(&pair[0]) {
                return false;
            }
        }
        for block in blocks {
            self.blocks.push_back(block.clone());
            if self.blocks.len() > self.max_size {
                self.blocks.pop_front();
            }
        }
        true
    }

    /// O(1) lookup by height via arithmetic offset from the front.
    pub fn find_by_height(&self, height: u64) -> Option<&LightBlock> {
        let front_height = self.blocks.front()?.height;
        if height < front_height {
            return None;
        }
        let offset = (height - front_height) as usize;
        self.blocks.get(offset)
    }

    /// Removes all nodes with `height > h`. If `h < base_block_height`,
    /// fails (returns false) without mutation. If `h == base_block_height`
    /// or `h` is below the retained head, clears the whole chain.
    pub fn truncate_to(&mut self, h: i64) -> bool {
        if h < self.base_block_height {
            return false;
        }
        if h == self.base_block_height || h < self.head_height() {
            self.blocks.clear();
            return true;
        }
        while let Some(back) = self.blocks.back() {
            if back.height as i64 > h {
                self.blocks.pop_back();
            } else {
                break;
            }
        }
        true
    }

    /// Returns up to the last `n` blocks, oldest first.
    pub fn get_last_n(&self, n: usize) -> Vec<LightBlock> {
        let len = self.blocks.len();
        let skip = len.saturating_sub(n);
        self.blocks.iter().skip(skip).cloned().collect()
    }

    pub fn to_array(&self) -> Vec<LightBlock> {
        self.blocks.iter().cloned().collect()
    }

    /// Restores a chain index from a previously-exported array. Trusts the
    /// input is already internally consecutive (as produced by
    /// [`ChainIndex::to_array`]); use [`ChainIndex::add_blocks`] instead if
    /// that isn't guaranteed.
    pub fn from_array(max_size: usize, base_block_height: i64, blocks: Vec<LightBlock>) -> Self {
        let mut idx = Self::new(max_size, base_block_height);
        idx.blocks = blocks.into();
        while idx.blocks.len() > idx.max_size {
            idx.blocks.pop_front();
        }
        idx
    }

    /// Same contract as [`ChainIndex::add_block`], but reports why a
    /// rejected block was rejected instead of a bare `false`.
    pub fn try_add_block(&mut self, block: LightBlock) -> Result<(), ChainIndexError> {
        if !self.validate_next_block(block.height, block.previous_hash) {
            let (expected, actual) = match self.tip() {
                Some(tip) => (format!("{}@{}", tip.hash, tip.height + 1), block.previous_hash.to_string()),
                None => ("<empty chain>".to_string(), block.previous_hash.to_string()),
            };
            let err = ChainIndexError::NonConsecutiveBlock {
                height: block.height,
                expected,
                actual,
            };
            tracing::warn!(error = %err, "rejected block");
            return Err(err);
        }
        self.add_block(block);
        Ok(())
    }

    /// Same contract as [`ChainIndex::truncate_to`], but reports the
    /// sentinel violation instead of a bare `false`.
    pub fn try_truncate_to(&mut self, h: i64) -> Result<(), ChainIndexError> {
        if h < self.base_block_height {
            return Err(ChainIndexError::TruncateBelowBase {
                target: h,
                base: self.base_block_height,
            });
        }
        self.truncate_to(h);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainrelay_primitives::BlockHash32;

    fn light(height: u64, hash: u8, prev: u8) -> LightBlock {
        LightBlock {
            height,
            hash: BlockHash32([hash; 32]),
            previous_hash: BlockHash32([prev; 32]),
            merkle_root: BlockHash32::ZERO,
            size: 100,
            txids: vec![],
        }
    }

    #[test]
    fn empty_chain_accepts_any_first_block() {
        let mut idx = ChainIndex::new(10, -1);
        assert!(idx.add_block(light(42, 1, 0)));
        assert_eq!(idx.tip().unwrap().height, 42);
    }

    #[test]
    fn add_block_rejects_non_consecutive() {
        let mut idx = ChainIndex::new(10, -1);
        assert!(idx.add_block(light(0, 1, 0)));
        assert!(!idx.add_block(light(2, 3, 1)));
        assert!(!idx.add_block(light(1, 3, 9)));
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn add_blocks_validates_whole_batch_before_mutating() {
        let mut idx = ChainIndex::new(10, -1);
        idx.add_block(light(0, 1, 0));
        let batch = vec![light(1, 2, 1), light(2, 3, 9) /* broken link */];
        assert!(!idx.add_blocks(&batch));
        assert_eq!(idx.len(), 1, "no partial insertion on batch failure");
    }

    #[test]
    fn eviction_at_max_size_removes_head() {
        let mut idx = ChainIndex::new(3, -1);
        for i in 0..5u64 {
            let prev = if i == 0 { 0 } else { i as u8 - 1 + 1 };
            idx.add_block(light(i, i as u8 + 1, prev));
        }
        assert_eq!(idx.len(), 3);
        assert_eq!(idx.head_height(), 2);
        assert_eq!(idx.tip().unwrap().height, 4);
    }

    #[test]
    fn find_by_height_is_consistent_after_eviction() {
        let mut idx = ChainIndex::new(2, -1);
        idx.add_block(light(0, 1, 0));
        idx.add_block(light(1, 2, 1));
        idx.add_block(light(2, 3, 2));
        assert!(idx.find_by_height(0).is_none());
        assert_eq!(idx.find_by_height(1).unwrap().height, 1);
        assert_eq!(idx.find_by_height(2).unwrap().height, 2);
    }

    #[test]
    fn truncate_to_removes_tail_past_height() {
        let mut idx = ChainIndex::new(10, -1);
        for i in 0..5u64 {
            idx.add_block(light(i, i as u8 + 1, i as u8));
        }
        assert!(idx.truncate_to(2));
        assert_eq!(idx.tip().unwrap().height, 2);
        assert_eq!(idx.len(), 3);
    }

    #[test]
    fn truncate_below_head_clears_chain() {
        let mut idx = ChainIndex::new(2, -1);
        idx.add_block(light(5, 1, 0));
        idx.add_block(light(6, 2, 1));
        idx.add_block(light(7, 3, 2));
        assert_eq!(idx.head_height(), 6);
        assert!(idx.truncate_to(5));
        assert!(idx.is_empty());
    }

    #[test]
    fn truncate_to_sentinel_clears() {
        let mut idx = ChainIndex::new(10, -1);
        idx.add_block(light(0, 1, 0));
        assert!(idx.truncate_to(-1));
        assert!(idx.is_empty());
    }

    #[test]
    fn truncate_below_sentinel_fails() {
        let mut idx = ChainIndex::new(10, -1);
        idx.add_block(light(0, 1, 0));
        assert!(!idx.truncate_to(-2));
        assert_eq!(idx.len(), 1, "failed truncate must not mutate");
    }

    #[test]
    fn try_add_block_reports_typed_error() {
        let mut idx = ChainIndex::new(10, -1);
        idx.try_add_block(light(0, 1, 0)).unwrap();
        let err = idx.try_add_block(light(5, 9, 9)).unwrap_err();
        assert!(matches!(err, ChainIndexError::NonConsecutiveBlock { height: 5, .. }));
    }

    #[test]
    fn try_truncate_to_reports_typed_error() {
        let mut idx = ChainIndex::new(10, -1);
        idx.add_block(light(0, 1, 0));
        let err = idx.try_truncate_to(-5).unwrap_err();
        assert!(matches!(err, ChainIndexError::TruncateBelowBase { target: -5, base: -1 }));
    }

    #[test]
    fn get_last_n_and_to_array_round_trip() {
        let mut idx = ChainIndex::new(10, -1);
        for i in 0..4u64 {
            idx.add_block(light(i, i as u8 + 1, i as u8));
        }
        assert_eq!(idx.get_last_n(2).len(), 2);
        let arr = idx.to_array();
        let restored = ChainIndex::from_array(10, -1, arr.clone());
        assert_eq!(restored.to_array(), arr);
    }
}
