//! Trace replay with per-block verification.
//!
//! Each live block is filled with a byte pattern derived from its trace id. The
//! driver checks alignment, usable size and overlap against every other live block
//! when a block is handed out, checks the pattern before a block is released or
//! resized, and checks that a resize kept the leading `min(old, new)` bytes.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tagheap_core::{Heap, HeapConfig, HeapError, HeapLogRecord, HeapViolation, PlacementPolicy};

use crate::trace::{Trace, TraceOp};

const ALIGNMENT: usize = tagheap_core::ALIGNMENT;

/// Replay knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayOptions {
    pub config: HeapConfig,
    /// Run the full heap scan after every op and stop at the first violation.
    pub check_each_op: bool,
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("heap init failed: {0}")]
    Init(#[from] HeapError),
    #[error("op {index}: request of {size} bytes for id {id} failed")]
    OutOfMemory { index: usize, id: usize, size: usize },
    #[error("op {index}: id {id} outside the trace's {num_ids} ids")]
    UnknownId {
        index: usize,
        id: usize,
        num_ids: usize,
    },
    #[error("op {index}: id {id} is already live")]
    IdInUse { index: usize, id: usize },
    #[error("op {index}: id {id} got misaligned payload {ptr:#x}")]
    Misaligned { index: usize, id: usize, ptr: usize },
    #[error("op {index}: id {id} got {usable} usable bytes for a {size}-byte request")]
    Undersized {
        index: usize,
        id: usize,
        size: usize,
        usable: usize,
    },
    #[error("op {index}: id {id} at [{start:#x}, {end:#x}) overlaps id {other}")]
    Overlap {
        index: usize,
        id: usize,
        other: usize,
        start: usize,
        end: usize,
    },
    #[error("op {index}: payload of id {id} corrupted at byte {offset}")]
    Corrupted {
        index: usize,
        id: usize,
        offset: usize,
    },
    #[error("op {index}: heap check failed: {violation}")]
    Invariant {
        index: usize,
        violation: HeapViolation,
    },
}

/// Outcome of one successful replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub trace_sha256: String,
    pub ops: usize,
    pub allocs: usize,
    pub reallocs: usize,
    pub frees: usize,
    /// Largest sum of live request sizes seen at any point.
    pub peak_live_bytes: usize,
    /// Arena length at the end of the run (the arena never shrinks).
    pub arena_bytes: usize,
    /// `peak_live_bytes / arena_bytes`.
    pub utilization: f64,
    /// Time spent inside heap calls.
    pub heap_time_ns: u64,
    pub ops_per_sec: f64,
    pub grow_calls: u64,
    pub reallocs_in_place: u64,
    pub reallocs_absorbed_prev: u64,
    pub reallocs_moved: u64,
    pub placement: String,
    pub chunk_size: usize,
    pub free_blocks_at_end: usize,
    pub fragmentation_at_end: f64,
}

#[derive(Debug, Clone, Copy)]
struct Live {
    ptr: usize,
    size: usize,
}

fn pattern_byte(id: usize, offset: usize) -> u8 {
    (id.wrapping_mul(0x9E37) ^ offset ^ (offset >> 8)) as u8
}

fn placement_label(placement: PlacementPolicy) -> String {
    match placement {
        PlacementPolicy::SizeThreshold { threshold } => format!("threshold:{threshold}"),
        other => other.name().to_string(),
    }
}

struct ReplayState {
    heap: Heap,
    slots: Vec<Option<Live>>,
    /// start -> (end, id) for every live block.
    ranges: BTreeMap<usize, (usize, usize)>,
    live_bytes: usize,
    peak_live_bytes: usize,
    heap_time: Duration,
}

impl ReplayState {
    fn timed<R>(&mut self, f: impl FnOnce(&mut Heap) -> R) -> R {
        let start = Instant::now();
        let out = f(&mut self.heap);
        self.heap_time += start.elapsed();
        out
    }

    fn admit(&mut self, index: usize, id: usize, ptr: usize, size: usize) -> Result<(), ReplayError> {
        if ptr % ALIGNMENT != 0 {
            return Err(ReplayError::Misaligned { index, id, ptr });
        }
        let usable = self.heap.usable_size(ptr).unwrap_or(0);
        if usable < size {
            return Err(ReplayError::Undersized {
                index,
                id,
                size,
                usable,
            });
        }

        let end = ptr + size;
        let below = self.ranges.range(..=ptr).next_back();
        let above = self.ranges.range(ptr..).next();
        let clash = match (below, above) {
            (Some((_, &(prev_end, other))), _) if prev_end > ptr => Some(other),
            (_, Some((&next_start, &(_, other)))) if next_start < end => Some(other),
            _ => None,
        };
        if let Some(other) = clash {
            return Err(ReplayError::Overlap {
                index,
                id,
                other,
                start: ptr,
                end,
            });
        }

        if let Some(payload) = self.heap.payload_mut(ptr) {
            for (offset, byte) in payload[..size].iter_mut().enumerate() {
                *byte = pattern_byte(id, offset);
            }
        }
        self.ranges.insert(ptr, (end, id));
        self.slots[id] = Some(Live { ptr, size });
        self.live_bytes += size;
        self.peak_live_bytes = self.peak_live_bytes.max(self.live_bytes);
        Ok(())
    }

    /// Check the first `len` bytes of `ptr` still carry `id`'s pattern.
    fn verify(&self, index: usize, id: usize, ptr: usize, len: usize) -> Result<(), ReplayError> {
        let payload = self.heap.payload(ptr).unwrap_or_default();
        let mismatch = (0..len).find(|&offset| payload.get(offset) != Some(&pattern_byte(id, offset)));
        match mismatch {
            Some(offset) => Err(ReplayError::Corrupted { index, id, offset }),
            None => Ok(()),
        }
    }

    /// Verify and forget the live block of `id`, if any.
    fn retire(&mut self, index: usize, id: usize) -> Result<Option<Live>, ReplayError> {
        let Some(live) = self.slots[id] else {
            return Ok(None);
        };
        self.verify(index, id, live.ptr, live.size)?;
        self.slots[id] = None;
        self.ranges.remove(&live.ptr);
        self.live_bytes -= live.size;
        Ok(Some(live))
    }
}

/// Replay `trace` against a fresh heap.
pub fn replay(trace: &Trace, options: &ReplayOptions) -> Result<ReplayReport, ReplayError> {
    replay_with_sink(trace, options, |_| {})
}

/// Like [`replay`], handing every heap lifecycle record to `sink` as it is produced.
pub fn replay_with_sink(
    trace: &Trace,
    options: &ReplayOptions,
    mut sink: impl FnMut(HeapLogRecord),
) -> Result<ReplayReport, ReplayError> {
    let mut heap: Heap = Heap::with_config(options.config);
    let init = heap.init();
    for record in heap.drain_lifecycle_logs() {
        sink(record);
    }
    init?;

    let mut state = ReplayState {
        heap,
        slots: vec![None; trace.num_ids],
        ranges: BTreeMap::new(),
        live_bytes: 0,
        peak_live_bytes: 0,
        heap_time: Duration::ZERO,
    };
    let (mut allocs, mut reallocs, mut frees) = (0, 0, 0);

    for (index, op) in trace.ops.iter().enumerate() {
        let step = apply(&mut state, index, *op);
        for record in state.heap.drain_lifecycle_logs() {
            sink(record);
        }
        step?;

        match op {
            TraceOp::Alloc { .. } => allocs += 1,
            TraceOp::Realloc { .. } => reallocs += 1,
            TraceOp::Free { .. } => frees += 1,
        }
        if options.check_each_op {
            if let Some(violation) = state.heap.check().into_iter().next() {
                return Err(ReplayError::Invariant { index, violation });
            }
        }
    }

    let counters = state.heap.counters();
    let stats = state.heap.stats();
    let heap_time_ns = u64::try_from(state.heap_time.as_nanos()).unwrap_or(u64::MAX);
    let secs = state.heap_time.as_secs_f64();
    Ok(ReplayReport {
        trace_sha256: trace.sha256(),
        ops: trace.ops.len(),
        allocs,
        reallocs,
        frees,
        peak_live_bytes: state.peak_live_bytes,
        arena_bytes: stats.arena_bytes,
        utilization: if stats.arena_bytes == 0 {
            0.0
        } else {
            state.peak_live_bytes as f64 / stats.arena_bytes as f64
        },
        heap_time_ns,
        ops_per_sec: if secs > 0.0 {
            trace.ops.len() as f64 / secs
        } else {
            0.0
        },
        grow_calls: counters.grow_calls,
        reallocs_in_place: counters.reallocs_in_place,
        reallocs_absorbed_prev: counters.reallocs_absorbed_prev,
        reallocs_moved: counters.reallocs_moved,
        placement: placement_label(options.config.placement),
        chunk_size: options.config.chunk_size,
        free_blocks_at_end: stats.free_blocks,
        fragmentation_at_end: stats.fragmentation(),
    })
}

fn apply(state: &mut ReplayState, index: usize, op: TraceOp) -> Result<(), ReplayError> {
    let num_ids = state.slots.len();
    if op.id() >= num_ids {
        return Err(ReplayError::UnknownId {
            index,
            id: op.id(),
            num_ids,
        });
    }
    match op {
        TraceOp::Alloc { id, size } => {
            if state.slots[id].is_some() {
                return Err(ReplayError::IdInUse { index, id });
            }
            match state.timed(|heap| heap.allocate(size)) {
                Some(ptr) => state.admit(index, id, ptr, size),
                None if size == 0 => Ok(()),
                None => Err(ReplayError::OutOfMemory { index, id, size }),
            }
        }
        TraceOp::Realloc { id, size } => {
            // A resize of a dead id behaves like an allocation.
            let old = state.retire(index, id)?;
            let old_ptr = old.map_or(0, |live| live.ptr);
            match state.timed(|heap| heap.resize(old_ptr, size)) {
                Some(ptr) => {
                    if let Some(old) = old {
                        state.verify(index, id, ptr, old.size.min(size))?;
                    }
                    state.admit(index, id, ptr, size)
                }
                None if size == 0 => Ok(()),
                None => Err(ReplayError::OutOfMemory { index, id, size }),
            }
        }
        TraceOp::Free { id } => {
            let ptr = state.retire(index, id)?.map_or(0, |live| live.ptr);
            state.timed(|heap| heap.release(ptr));
            Ok(())
        }
    }
}
