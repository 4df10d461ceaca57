use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Produces globally-unique, strictly-increasing outbox ids.
///
/// Seeded from a microsecond-resolution timestamp so ids assigned by
/// successive process runs don't collide with a prior run's high
/// watermark, then advanced purely by a monotonic counter -- the same
/// atomic-field approach `BlockQueue` already uses for its own
/// height/size bookkeeping. `next_range` reserves a contiguous block of
/// ids in one fetch_add, which is what guarantees two successive
/// `persistAggregatesAndOutbox` calls produce disjoint, strictly-greater
/// ranges even under concurrent callers.
pub struct OutboxIdGenerator {
    counter: AtomicU64,
}

impl OutboxIdGenerator {
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_micros() as u64;
        Self {
            counter: AtomicU64::new(seed),
        }
    }

    /// Reserves `n` (at least 1) ascending ids and returns `(first, last)`.
    pub fn next_range(&self, n: usize) -> (i64, i64) {
        let n = (n.max(1)) as u64;
        let first = self.counter.fetch_add(n, Ordering::SeqCst);
        (first as i64, (first + n - 1) as i64)
    }
}

impl Default for OutboxIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
