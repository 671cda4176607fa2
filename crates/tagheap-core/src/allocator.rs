//! Allocator core.
//!
//! `Heap` composes the block model, the size-ordered free list and an [`Arena`]
//! into `allocate` / `release` / `resize` / `calloc`. Every public entry point
//! returns with the heap invariants intact:
//!
//! 1. header and footer of every block agree;
//! 2. no two free blocks are adjacent;
//! 3. every block size is a multiple of [`ALIGNMENT`](crate::block::ALIGNMENT) and
//!    at least [`MIN_BLOCK_SIZE`];
//! 4. the free list is ascending by size.
//!
//! The arena starts with a padding word, a prologue block and an epilogue header,
//! so neighbour lookups never need a bounds special case.

use crate::arena::{Arena, VecArena};
use crate::block::{
    BlockMeta, MIN_BLOCK_SIZE, PROLOGUE_SIZE, WORD_SIZE, adjusted_size, align_up,
    block_size, header, header_offset, is_allocated, payload_capacity, prev_block, prev_meta,
    set_meta, write_meta, write_word,
};
use crate::check::{self, HeapViolation};
use crate::config::{HeapConfig, SplitSide};
use crate::error::HeapError;
use crate::free_list::FreeList;
use crate::lifecycle::{HeapLogLevel, HeapLogRecord};
use crate::stats::{self, HeapStats};

/// Running operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapCounters {
    /// Blocks handed out by allocate, calloc and resize fallbacks.
    pub allocs: u64,
    /// Blocks returned through release (or resize to zero).
    pub frees: u64,
    /// Resizes that kept the block address.
    pub reallocs_in_place: u64,
    /// Resizes that slid the payload down into a free predecessor.
    pub reallocs_absorbed_prev: u64,
    /// Resizes that fell back to allocate, copy, release.
    pub reallocs_moved: u64,
    /// Successful arena extensions, the initial prologue growth included.
    pub grow_calls: u64,
    pub grow_bytes: u64,
    /// Requests answered with `None` for lack of memory or size overflow.
    pub failed_allocs: u64,
    /// Pointers refused by release/resize validation.
    pub invalid_pointers: u64,
}

/// One boundary-tag heap over one arena.
pub struct Heap<A: Arena = VecArena> {
    arena: A,
    config: HeapConfig,
    free_list: FreeList,
    /// Payload offset of the prologue block; `0` until `init` runs.
    prologue: usize,
    initialized: bool,
    counters: HeapCounters,
    next_decision_id: u64,
    lifecycle_logs: Vec<HeapLogRecord>,
}

impl Heap<VecArena> {
    /// Uninitialized heap over a `VecArena` capped at `config.max_arena_bytes`.
    #[must_use]
    pub fn with_config(config: HeapConfig) -> Self {
        Self::new(VecArena::with_limit(config.max_arena_bytes), config)
    }
}

impl Default for Heap<VecArena> {
    fn default() -> Self {
        Self::with_config(HeapConfig::default())
    }
}

impl<A: Arena> Heap<A> {
    /// Wrap `arena`. Call [`Heap::init`] before the first request.
    pub fn new(arena: A, config: HeapConfig) -> Self {
        Self {
            arena,
            config,
            free_list: FreeList::new(),
            prologue: 0,
            initialized: false,
            counters: HeapCounters::default(),
            next_decision_id: 1,
            lifecycle_logs: Vec::new(),
        }
    }

    fn next_log_decision_id(&mut self) -> u64 {
        let id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        id
    }

    #[allow(clippy::too_many_arguments)]
    fn record_lifecycle(
        &mut self,
        level: HeapLogLevel,
        symbol: &'static str,
        event: &'static str,
        ptr: Option<usize>,
        size: Option<usize>,
        outcome: &'static str,
        details: impl Into<String>,
    ) {
        if level < self.config.log_level {
            return;
        }
        let decision_id = self.next_log_decision_id();
        let trace_id = format!("core::heap::{}::{:016x}", symbol, decision_id);
        self.lifecycle_logs.push(HeapLogRecord {
            decision_id,
            trace_id,
            level,
            symbol,
            event,
            ptr,
            size,
            outcome,
            details: details.into(),
            arena_bytes: self.arena.len(),
            free_blocks: self.free_list.len(),
        });
    }

    /// Reset the arena and lay out a fresh heap: padding word, prologue, epilogue,
    /// then one free block of `chunk_size` bytes.
    ///
    /// Any previous allocations are forgotten. On failure the heap stays
    /// uninitialized and every request returns `None` until a later `init`
    /// succeeds.
    pub fn init(&mut self) -> Result<(), HeapError> {
        self.arena.reset();
        self.free_list.clear();
        self.prologue = 0;
        self.initialized = false;

        let result = self.build_initial_heap();
        match &result {
            Ok(()) => {
                self.initialized = true;
                self.record_lifecycle(
                    HeapLogLevel::Info,
                    "init",
                    "init",
                    Some(self.prologue),
                    Some(self.arena.len()),
                    "ok",
                    format!(
                        "chunk_size={} placement={} check={:?}",
                        self.config.chunk_size,
                        self.config.placement.name(),
                        self.config.check
                    ),
                );
            }
            Err(err) => {
                self.record_lifecycle(
                    HeapLogLevel::Warn,
                    "init",
                    "init",
                    None,
                    None,
                    err.label(),
                    err.to_string(),
                );
            }
        }
        self.after_op("init");
        result
    }

    fn build_initial_heap(&mut self) -> Result<(), HeapError> {
        let base = self.grow_contiguous(4 * WORD_SIZE)?;
        let prologue = base + 2 * WORD_SIZE;
        let bytes = self.arena.bytes_mut();
        write_word(bytes, base, 0);
        set_meta(bytes, prologue, BlockMeta::used(PROLOGUE_SIZE));
        write_meta(
            bytes,
            header_offset(prologue + PROLOGUE_SIZE),
            BlockMeta::used(0),
        );
        self.prologue = prologue;
        self.extend_heap("init", self.config.chunk_size)?;
        Ok(())
    }

    /// Grow the arena, insisting the extension starts at the old end and is exactly
    /// `increment` bytes long.
    ///
    /// An arena that breaks either rule has already moved its end away from the
    /// epilogue, so the heap drops back to uninitialized and refuses further
    /// requests until the next `init`.
    fn grow_contiguous(&mut self, increment: usize) -> Result<usize, HeapError> {
        let expected = self.arena.len();
        let Some(start) = self.arena.grow(increment) else {
            return Err(HeapError::OutOfMemory {
                requested: increment,
                arena_bytes: expected,
            });
        };
        if start != expected {
            self.initialized = false;
            return Err(HeapError::NonContiguousGrowth {
                expected,
                returned: start,
            });
        }
        let grown = self.arena.len().saturating_sub(expected);
        if grown != increment {
            self.initialized = false;
            return Err(HeapError::GrowthSizeMismatch {
                requested: increment,
                grown,
            });
        }
        self.counters.grow_calls += 1;
        self.counters.grow_bytes += increment as u64;
        Ok(start)
    }

    /// Append a free block of at least `request` bytes over the old epilogue and
    /// merge it with a free predecessor. Returns the resulting free block.
    fn extend_heap(&mut self, symbol: &'static str, request: usize) -> Result<usize, HeapError> {
        let size = align_up(request.max(MIN_BLOCK_SIZE))
            .ok_or(HeapError::RequestOverflow { requested: request })?;
        let start = match self.grow_contiguous(size) {
            Ok(start) => start,
            Err(err) => {
                let event = match err {
                    HeapError::OutOfMemory { .. } => "oom",
                    _ => "grow_failed",
                };
                self.record_lifecycle(
                    HeapLogLevel::Warn,
                    symbol,
                    event,
                    None,
                    Some(size),
                    err.label(),
                    err.to_string(),
                );
                return Err(err);
            }
        };

        // The old epilogue header becomes the new block's header.
        let bytes = self.arena.bytes_mut();
        set_meta(bytes, start, BlockMeta::free(size));
        write_meta(bytes, header_offset(start + size), BlockMeta::used(0));

        self.record_lifecycle(
            HeapLogLevel::Info,
            symbol,
            "arena_grow",
            Some(start),
            Some(size),
            "grown",
            format!("arena_bytes={}", self.arena.len()),
        );
        Ok(self.coalesce(start))
    }

    /// Merge the free block at `bp` with free neighbours and link the result.
    ///
    /// `bp` must already carry free tags and must not be on the list. Returns the
    /// payload offset of the merged block, which moves to the predecessor when
    /// that one was free.
    fn coalesce(&mut self, bp: usize) -> usize {
        let bytes = self.arena.bytes_mut();
        let size = block_size(bytes, bp);
        let next = bp + size;
        let prev_free = !prev_meta(bytes, bp).allocated;
        let next_free = !is_allocated(bytes, next);

        let (start, merged) = match (prev_free, next_free) {
            (false, false) => (bp, size),
            (false, true) => {
                self.free_list.remove(bytes, next);
                (bp, size + block_size(bytes, next))
            }
            (true, false) => {
                let prev = prev_block(bytes, bp);
                self.free_list.remove(bytes, prev);
                (prev, block_size(bytes, prev) + size)
            }
            (true, true) => {
                let prev = prev_block(bytes, bp);
                self.free_list.remove(bytes, prev);
                self.free_list.remove(bytes, next);
                (
                    prev,
                    block_size(bytes, prev) + size + block_size(bytes, next),
                )
            }
        };

        set_meta(bytes, start, BlockMeta::free(merged));
        self.free_list.insert(bytes, start);
        start
    }

    /// Allocate `asize` bytes out of the free block at `bp`.
    fn place(&mut self, bp: usize, asize: usize) -> usize {
        let bytes = self.arena.bytes_mut();
        self.free_list.remove(bytes, bp);
        let size = block_size(bytes, bp);
        let remainder = size - asize;
        if remainder < MIN_BLOCK_SIZE {
            set_meta(bytes, bp, BlockMeta::used(size));
            return bp;
        }

        // The leftover borders only allocated blocks, so no coalescing is needed.
        match self.config.placement.side(asize) {
            SplitSide::Front => {
                set_meta(bytes, bp, BlockMeta::used(asize));
                let rest = bp + asize;
                set_meta(bytes, rest, BlockMeta::free(remainder));
                self.free_list.insert(bytes, rest);
                bp
            }
            SplitSide::Back => {
                set_meta(bytes, bp, BlockMeta::free(remainder));
                self.free_list.insert(bytes, bp);
                let taken = bp + remainder;
                set_meta(bytes, taken, BlockMeta::used(asize));
                taken
            }
        }
    }

    /// Give the allocated block at `bp` the size `asize` out of `total` bytes
    /// starting at `bp`, freeing a tail worth keeping.
    fn finish_in_place(&mut self, bp: usize, total: usize, asize: usize) {
        let bytes = self.arena.bytes_mut();
        if total - asize < MIN_BLOCK_SIZE {
            set_meta(bytes, bp, BlockMeta::used(total));
            return;
        }
        set_meta(bytes, bp, BlockMeta::used(asize));
        let rest = bp + asize;
        set_meta(bytes, rest, BlockMeta::free(total - asize));
        // A shrink can leave the tail next to a free successor.
        self.coalesce(rest);
    }

    fn free_block(&mut self, ptr: usize) -> usize {
        let bytes = self.arena.bytes_mut();
        let size = block_size(bytes, ptr);
        set_meta(bytes, ptr, BlockMeta::free(size));
        self.coalesce(ptr)
    }

    fn ready(&mut self, symbol: &'static str) -> bool {
        if self.initialized {
            return true;
        }
        let err = HeapError::NotInitialized;
        self.record_lifecycle(
            HeapLogLevel::Warn,
            symbol,
            "not_initialized",
            None,
            None,
            err.label(),
            err.to_string(),
        );
        false
    }

    /// Pointer validation for release/resize when checking is enabled.
    fn accept_pointer(&mut self, symbol: &'static str, ptr: usize) -> bool {
        if !self.config.check.validates_pointers() {
            return true;
        }
        match check::validate_live_block(self.arena.bytes(), self.prologue, ptr) {
            Ok(_) => true,
            Err(violation) => {
                self.counters.invalid_pointers += 1;
                self.record_lifecycle(
                    HeapLogLevel::Warn,
                    symbol,
                    "invalid_pointer",
                    Some(ptr),
                    None,
                    violation.label(),
                    violation.to_string(),
                );
                false
            }
        }
    }

    fn adjusted_or_log(&mut self, symbol: &'static str, size: usize) -> Option<usize> {
        let asize = adjusted_size(size);
        if asize.is_none() {
            let err = HeapError::RequestOverflow { requested: size };
            self.counters.failed_allocs += 1;
            self.record_lifecycle(
                HeapLogLevel::Warn,
                symbol,
                "oom",
                None,
                Some(size),
                err.label(),
                err.to_string(),
            );
        }
        asize
    }

    fn after_op(&mut self, symbol: &'static str) {
        if !self.config.check.scans_after_each_op() {
            return;
        }
        for violation in self.check() {
            self.record_lifecycle(
                HeapLogLevel::Error,
                symbol,
                "invariant_violation",
                None,
                None,
                violation.label(),
                violation.to_string(),
            );
        }
    }

    /// Allocate a block with at least `size` payload bytes.
    ///
    /// Returns the 16-aligned payload offset, or `None` for a zero-size request, a
    /// size that overflows the block arithmetic, or arena exhaustion. A `None`
    /// leaves the heap unchanged apart from any arena growth that succeeded.
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        let ptr = self.allocate_block("allocate", size);
        self.after_op("allocate");
        ptr
    }

    fn allocate_block(&mut self, symbol: &'static str, size: usize) -> Option<usize> {
        if !self.ready(symbol) {
            return None;
        }
        if size == 0 {
            self.record_lifecycle(
                HeapLogLevel::Debug,
                symbol,
                "alloc_zero",
                None,
                Some(0),
                "null",
                "zero-size request",
            );
            return None;
        }
        let asize = self.adjusted_or_log(symbol, size)?;

        let fit = self.free_list.find_fit(self.arena.bytes(), asize);
        let bp = match fit {
            Some(bp) => bp,
            None => match self.extend_heap(symbol, asize.max(self.config.chunk_size)) {
                Ok(bp) => bp,
                Err(_) => {
                    self.counters.failed_allocs += 1;
                    return None;
                }
            },
        };
        let ptr = self.place(bp, asize);
        self.counters.allocs += 1;
        self.record_lifecycle(
            HeapLogLevel::Trace,
            symbol,
            "alloc",
            Some(ptr),
            Some(size),
            if fit.is_some() {
                "free_list_fit"
            } else {
                "arena_grow"
            },
            "",
        );
        Some(ptr)
    }

    /// Return the block at `ptr` to the heap. `0` is a no-op.
    ///
    /// With checking off, `ptr` must be a live payload offset from this heap;
    /// anything else corrupts the heap or panics on an out-of-range tag read.
    pub fn release(&mut self, ptr: usize) {
        self.release_block("release", ptr);
        self.after_op("release");
    }

    fn release_block(&mut self, symbol: &'static str, ptr: usize) {
        if ptr == 0 {
            self.record_lifecycle(
                HeapLogLevel::Debug,
                symbol,
                "free_null",
                None,
                None,
                "noop",
                "",
            );
            return;
        }
        if !self.ready(symbol) || !self.accept_pointer(symbol, ptr) {
            return;
        }
        let size = block_size(self.arena.bytes(), ptr);
        let merged = self.free_block(ptr);
        self.counters.frees += 1;
        self.record_lifecycle(
            HeapLogLevel::Trace,
            symbol,
            "free",
            Some(ptr),
            Some(size),
            if merged == ptr {
                "released"
            } else {
                "merged_into_prev"
            },
            "",
        );
    }

    /// Change the payload of `ptr` to `new_size` bytes.
    ///
    /// `ptr == 0` behaves like `allocate(new_size)`; `new_size == 0` releases
    /// `ptr` and returns `None`. Otherwise the block is shrunk in place, grown in
    /// place into a free successor when the predecessor is allocated, slid down
    /// into a free predecessor (merging a free successor too), or moved to a fresh
    /// block. The first `min(old payload,
    /// new_size)` bytes survive every path. If no memory can be found the call
    /// returns `None` and `ptr` stays valid and unchanged.
    pub fn resize(&mut self, ptr: usize, new_size: usize) -> Option<usize> {
        let result = self.resize_block(ptr, new_size);
        self.after_op("resize");
        result
    }

    fn resize_block(&mut self, ptr: usize, new_size: usize) -> Option<usize> {
        const SYMBOL: &str = "resize";
        if ptr == 0 {
            return self.allocate_block(SYMBOL, new_size);
        }
        if new_size == 0 {
            self.release_block(SYMBOL, ptr);
            return None;
        }
        if !self.ready(SYMBOL) || !self.accept_pointer(SYMBOL, ptr) {
            return None;
        }
        let asize = self.adjusted_or_log(SYMBOL, new_size)?;

        let bytes = self.arena.bytes();
        let cur = block_size(bytes, ptr);
        if asize <= cur {
            self.finish_in_place(ptr, cur, asize);
            self.counters.reallocs_in_place += 1;
            self.record_lifecycle(
                HeapLogLevel::Trace,
                SYMBOL,
                "realloc_shrink",
                Some(ptr),
                Some(new_size),
                "in_place",
                "",
            );
            return Some(ptr);
        }

        let next = ptr + cur;
        let next_meta = header(bytes, next);
        let prev_tag = prev_meta(bytes, ptr);
        let next_free = if next_meta.allocated { 0 } else { next_meta.size };
        let prev_free = if prev_tag.allocated { 0 } else { prev_tag.size };

        // A free predecessor turns this into the three-way merge below.
        if prev_free == 0 && next_free > 0 && cur + next_free >= asize {
            self.free_list.remove(self.arena.bytes_mut(), next);
            self.finish_in_place(ptr, cur + next_free, asize);
            self.counters.reallocs_in_place += 1;
            self.record_lifecycle(
                HeapLogLevel::Trace,
                SYMBOL,
                "realloc_absorb_next",
                Some(ptr),
                Some(new_size),
                "in_place",
                "",
            );
            return Some(ptr);
        }

        if prev_free > 0 && prev_free + cur + next_free >= asize {
            let prev = ptr - prev_free;
            let bytes = self.arena.bytes_mut();
            self.free_list.remove(bytes, prev);
            if next_free > 0 {
                self.free_list.remove(bytes, next);
            }
            // Regions overlap; copy_within has memmove semantics.
            bytes.copy_within(ptr..ptr + payload_capacity(cur), prev);
            self.finish_in_place(prev, prev_free + cur + next_free, asize);
            self.counters.reallocs_absorbed_prev += 1;
            self.record_lifecycle(
                HeapLogLevel::Trace,
                SYMBOL,
                if next_free > 0 {
                    "realloc_absorb_both"
                } else {
                    "realloc_absorb_prev"
                },
                Some(prev),
                Some(new_size),
                "moved_down",
                "",
            );
            return Some(prev);
        }

        let new_ptr = self.allocate_block(SYMBOL, new_size)?;
        let copy = payload_capacity(cur).min(new_size);
        self.arena
            .bytes_mut()
            .copy_within(ptr..ptr + copy, new_ptr);
        self.free_block(ptr);
        self.counters.reallocs_moved += 1;
        self.record_lifecycle(
            HeapLogLevel::Trace,
            SYMBOL,
            "realloc_move",
            Some(new_ptr),
            Some(new_size),
            "moved",
            "",
        );
        Some(new_ptr)
    }

    /// Allocate `count * size` bytes and zero the whole usable payload.
    ///
    /// An overflowing product returns `None` without touching the heap.
    pub fn calloc(&mut self, count: usize, size: usize) -> Option<usize> {
        let ptr = self.calloc_block(count, size);
        self.after_op("calloc");
        ptr
    }

    fn calloc_block(&mut self, count: usize, size: usize) -> Option<usize> {
        let Some(total) = count.checked_mul(size) else {
            self.counters.failed_allocs += 1;
            self.record_lifecycle(
                HeapLogLevel::Warn,
                "calloc",
                "calloc_overflow",
                None,
                None,
                "overflow",
                format!("count={} size={}", count, size),
            );
            return None;
        };
        let ptr = self.allocate_block("calloc", total)?;
        let bytes = self.arena.bytes_mut();
        let end = ptr + payload_capacity(block_size(bytes, ptr));
        bytes[ptr..end].fill(0);
        Some(ptr)
    }

    /// Usable payload bytes of the live block at `ptr`.
    #[must_use]
    pub fn usable_size(&self, ptr: usize) -> Option<usize> {
        if !self.initialized {
            return None;
        }
        check::validate_live_block(self.arena.bytes(), self.prologue, ptr)
            .ok()
            .map(|meta| payload_capacity(meta.size))
    }

    /// Payload bytes of the live block at `ptr`.
    #[must_use]
    pub fn payload(&self, ptr: usize) -> Option<&[u8]> {
        let len = self.usable_size(ptr)?;
        Some(&self.arena.bytes()[ptr..ptr + len])
    }

    /// Payload bytes of the live block at `ptr`, mutably.
    pub fn payload_mut(&mut self, ptr: usize) -> Option<&mut [u8]> {
        let len = self.usable_size(ptr)?;
        Some(&mut self.arena.bytes_mut()[ptr..ptr + len])
    }

    /// Full consistency scan. Empty when the heap is sound (or not initialized).
    #[must_use]
    pub fn check(&self) -> Vec<HeapViolation> {
        if !self.initialized {
            return Vec::new();
        }
        check::scan(self.arena.bytes(), self.prologue, &self.free_list)
    }

    /// Block and byte totals from a walk of the heap.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        if !self.initialized {
            return HeapStats::default();
        }
        stats::collect(self.arena.bytes(), self.prologue, self.free_list.len())
    }

    #[must_use]
    pub fn counters(&self) -> HeapCounters {
        self.counters
    }

    #[must_use]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    #[must_use]
    pub fn arena(&self) -> &A {
        &self.arena
    }

    #[must_use]
    pub fn free_list(&self) -> &FreeList {
        &self.free_list
    }

    /// Payload offset of the prologue sentinel (`0` before init).
    #[must_use]
    pub fn prologue(&self) -> usize {
        self.prologue
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Structured lifecycle records collected so far.
    #[must_use]
    pub fn lifecycle_logs(&self) -> &[HeapLogRecord] {
        &self.lifecycle_logs
    }

    /// Take and clear the collected lifecycle records.
    pub fn drain_lifecycle_logs(&mut self) -> Vec<HeapLogRecord> {
        std::mem::take(&mut self.lifecycle_logs)
    }
}
