//! Heap statistics from a walk of the block chain.

use crate::block::{MIN_BLOCK_SIZE, PROLOGUE_SIZE, WORD_SIZE, header, header_offset};

/// Snapshot of block and byte totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Arena length, sentinels included.
    pub arena_bytes: usize,
    /// Real blocks (sentinels excluded).
    pub total_blocks: usize,
    pub allocated_blocks: usize,
    /// Bytes held by allocated blocks, tags included.
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    /// Bytes held by free blocks, tags included.
    pub free_bytes: usize,
    pub largest_free_block: usize,
    /// Length recorded by the free list (should equal `free_blocks`).
    pub free_list_len: usize,
}

impl HeapStats {
    /// External fragmentation: `1 - largest_free / free_bytes`, `0.0` with no free
    /// memory.
    #[must_use]
    pub fn fragmentation(&self) -> f64 {
        if self.free_bytes == 0 {
            return 0.0;
        }
        1.0 - self.largest_free_block as f64 / self.free_bytes as f64
    }

    /// Share of the arena held by allocated blocks.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.arena_bytes == 0 {
            return 0.0;
        }
        self.allocated_bytes as f64 / self.arena_bytes as f64
    }
}

/// Walk the chain from the block after `prologue` up to the epilogue.
///
/// The walk stops early at the first malformed tag; the checker reports those.
pub(crate) fn collect(bytes: &[u8], prologue: usize, free_list_len: usize) -> HeapStats {
    let mut stats = HeapStats {
        arena_bytes: bytes.len(),
        free_list_len,
        ..HeapStats::default()
    };
    let mut bp = prologue + PROLOGUE_SIZE;
    while header_offset(bp) + WORD_SIZE <= bytes.len() {
        let meta = header(bytes, bp);
        if meta.size < MIN_BLOCK_SIZE || bp + meta.size > bytes.len() {
            break;
        }
        stats.total_blocks += 1;
        if meta.allocated {
            stats.allocated_blocks += 1;
            stats.allocated_bytes += meta.size;
        } else {
            stats.free_blocks += 1;
            stats.free_bytes += meta.size;
            stats.largest_free_block = stats.largest_free_block.max(meta.size);
        }
        bp += meta.size;
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Heap;

    #[test]
    fn fresh_heap_is_one_free_chunk() {
        let mut heap: Heap = Heap::default();
        heap.init().unwrap();
        let stats = heap.stats();
        assert_eq!(stats.arena_bytes, 32 + 4096);
        assert_eq!(stats.total_blocks, 1);
        assert_eq!(stats.free_bytes, 4096);
        assert_eq!(stats.largest_free_block, 4096);
        assert_eq!(stats.free_list_len, 1);
        assert_eq!(stats.fragmentation(), 0.0);
    }

    #[test]
    fn counts_split_blocks() {
        let mut heap: Heap = Heap::default();
        heap.init().unwrap();
        let a = heap.allocate(200).unwrap();
        let _b = heap.allocate(200).unwrap();
        heap.release(a);

        let stats = heap.stats();
        assert_eq!(stats.total_blocks, 3);
        assert_eq!(stats.allocated_blocks, 1);
        assert_eq!(stats.allocated_bytes, 224);
        assert_eq!(stats.free_blocks, 2);
        assert_eq!(stats.free_bytes, 4096 - 224);
        assert_eq!(stats.largest_free_block, 4096 - 448);
        assert!(stats.fragmentation() > 0.0);
        assert!((stats.utilization() - 224.0 / 4128.0).abs() < 1e-9);
    }

    #[test]
    fn empty_stats_are_neutral() {
        let stats = HeapStats::default();
        assert_eq!(stats.fragmentation(), 0.0);
        assert_eq!(stats.utilization(), 0.0);
    }
}
