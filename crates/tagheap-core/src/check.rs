//! Heap consistency checking.
//!
//! Two entry points: [`validate_live_block`] is an O(1) sanity check of a pointer
//! handed to release or resize, and [`scan`] walks the whole block chain and the
//! free list. Both only report; neither touches the heap.

use std::collections::HashSet;

use thiserror::Error;

use crate::block::{
    ALIGNMENT, BlockMeta, MIN_BLOCK_SIZE, PROLOGUE_SIZE, WORD_SIZE, footer_offset, header,
    header_offset, read_meta,
};
use crate::free_list::{FreeList, prev_link};

/// A broken heap invariant or an unusable pointer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapViolation {
    #[error("prologue at {bp} is damaged")]
    BadPrologue { bp: usize },
    #[error("block at {bp} lies outside the arena ({arena_bytes} bytes)")]
    OutOfRange { bp: usize, arena_bytes: usize },
    #[error("block at {bp} is misaligned")]
    Misaligned { bp: usize },
    #[error("block at {bp} has illegal size {size}")]
    BadSize { bp: usize, size: usize },
    #[error("block at {bp} has header {header:?} but footer {footer:?}")]
    TagMismatch {
        bp: usize,
        header: BlockMeta,
        footer: BlockMeta,
    },
    #[error("free blocks at {first} and {second} are adjacent")]
    AdjacentFree { first: usize, second: usize },
    #[error("epilogue missing; chain ended at tag offset {offset}")]
    MissingEpilogue { offset: usize },
    #[error("block at {bp} is not allocated")]
    NotAllocated { bp: usize },
    #[error("allocated block at {bp} is linked in the free list")]
    AllocatedInFreeList { bp: usize },
    #[error("free-list node {bp} links back to {found:?}, expected {expected:?}")]
    BrokenBackLink {
        bp: usize,
        expected: Option<usize>,
        found: Option<usize>,
    },
    #[error("free-list node {bp} of size {size} follows a node of size {previous_size}")]
    FreeListUnordered {
        bp: usize,
        size: usize,
        previous_size: usize,
    },
    #[error("free list does not terminate")]
    FreeListCycle,
    #[error("free-list node {bp} is not a block in the heap chain")]
    StrayFreeListNode { bp: usize },
    #[error("free block at {bp} is missing from the free list")]
    FreeBlockNotListed { bp: usize },
    #[error("free list walks {listed} nodes, records {recorded}, chain holds {in_chain} free blocks")]
    FreeCountMismatch {
        listed: usize,
        recorded: usize,
        in_chain: usize,
    },
}

impl HeapViolation {
    /// Short machine-readable label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::BadPrologue { .. } => "bad_prologue",
            Self::OutOfRange { .. } => "out_of_range",
            Self::Misaligned { .. } => "misaligned",
            Self::BadSize { .. } => "bad_size",
            Self::TagMismatch { .. } => "tag_mismatch",
            Self::AdjacentFree { .. } => "adjacent_free",
            Self::MissingEpilogue { .. } => "missing_epilogue",
            Self::NotAllocated { .. } => "not_allocated",
            Self::AllocatedInFreeList { .. } => "allocated_in_free_list",
            Self::BrokenBackLink { .. } => "broken_back_link",
            Self::FreeListUnordered { .. } => "free_list_unordered",
            Self::FreeListCycle => "free_list_cycle",
            Self::StrayFreeListNode { .. } => "stray_free_list_node",
            Self::FreeBlockNotListed { .. } => "free_block_not_listed",
            Self::FreeCountMismatch { .. } => "free_count_mismatch",
        }
    }
}

fn size_is_legal(size: usize) -> bool {
    size % ALIGNMENT == 0 && size >= MIN_BLOCK_SIZE
}

/// Check that `ptr` looks like the payload of a live block.
///
/// Best effort: a pointer into the middle of a block can land on bytes that happen
/// to decode as a consistent tag pair.
pub fn validate_live_block(
    bytes: &[u8],
    prologue: usize,
    ptr: usize,
) -> Result<BlockMeta, HeapViolation> {
    let arena_bytes = bytes.len();
    let first = prologue + PROLOGUE_SIZE;
    if ptr < first || ptr + WORD_SIZE > arena_bytes {
        return Err(HeapViolation::OutOfRange {
            bp: ptr,
            arena_bytes,
        });
    }
    if ptr % ALIGNMENT != 0 {
        return Err(HeapViolation::Misaligned { bp: ptr });
    }
    let hdr = header(bytes, ptr);
    if !size_is_legal(hdr.size) || ptr + hdr.size > arena_bytes {
        return Err(HeapViolation::BadSize {
            bp: ptr,
            size: hdr.size,
        });
    }
    let ftr = read_meta(bytes, footer_offset(ptr, hdr.size));
    if ftr != hdr {
        return Err(HeapViolation::TagMismatch {
            bp: ptr,
            header: hdr,
            footer: ftr,
        });
    }
    if !hdr.allocated {
        return Err(HeapViolation::NotAllocated { bp: ptr });
    }
    Ok(hdr)
}

/// Walk the block chain and the free list, collecting every violation found.
#[must_use]
pub fn scan(bytes: &[u8], prologue: usize, free_list: &FreeList) -> Vec<HeapViolation> {
    let mut violations = Vec::new();
    let arena_bytes = bytes.len();

    if prologue < WORD_SIZE || prologue + PROLOGUE_SIZE > arena_bytes {
        violations.push(HeapViolation::BadPrologue { bp: prologue });
        return violations;
    }
    let expected = BlockMeta::used(PROLOGUE_SIZE);
    if header(bytes, prologue) != expected
        || read_meta(bytes, footer_offset(prologue, PROLOGUE_SIZE)) != expected
    {
        violations.push(HeapViolation::BadPrologue { bp: prologue });
    }

    let chain_free = scan_chain(bytes, prologue, &mut violations);
    scan_free_list(bytes, prologue, free_list, &chain_free, &mut violations);
    violations
}

/// Returns the payload offsets of every free block, in address order.
fn scan_chain(bytes: &[u8], prologue: usize, violations: &mut Vec<HeapViolation>) -> Vec<usize> {
    let arena_bytes = bytes.len();
    let mut free_blocks = Vec::new();
    let mut prev_free: Option<usize> = None;
    let mut bp = prologue + PROLOGUE_SIZE;

    loop {
        if header_offset(bp) + WORD_SIZE > arena_bytes {
            violations.push(HeapViolation::MissingEpilogue {
                offset: header_offset(bp),
            });
            break;
        }
        let hdr = header(bytes, bp);
        if hdr.size == 0 {
            if !hdr.allocated || header_offset(bp) + WORD_SIZE != arena_bytes {
                violations.push(HeapViolation::MissingEpilogue {
                    offset: header_offset(bp),
                });
            }
            break;
        }
        if bp % ALIGNMENT != 0 {
            violations.push(HeapViolation::Misaligned { bp });
            break;
        }
        if !size_is_legal(hdr.size) {
            violations.push(HeapViolation::BadSize { bp, size: hdr.size });
            break;
        }
        if bp + hdr.size > arena_bytes {
            violations.push(HeapViolation::OutOfRange { bp, arena_bytes });
            break;
        }

        let ftr = read_meta(bytes, footer_offset(bp, hdr.size));
        if ftr != hdr {
            violations.push(HeapViolation::TagMismatch {
                bp,
                header: hdr,
                footer: ftr,
            });
        }

        if hdr.allocated {
            prev_free = None;
        } else {
            if let Some(first) = prev_free {
                violations.push(HeapViolation::AdjacentFree { first, second: bp });
            }
            prev_free = Some(bp);
            free_blocks.push(bp);
        }
        bp += hdr.size;
    }

    free_blocks
}

fn scan_free_list(
    bytes: &[u8],
    prologue: usize,
    free_list: &FreeList,
    chain_free: &[usize],
    violations: &mut Vec<HeapViolation>,
) {
    let arena_bytes = bytes.len();
    let chain_set: HashSet<usize> = chain_free.iter().copied().collect();
    let mut listed_set = HashSet::new();
    let mut expected_prev = None;
    let mut previous_size = 0;
    let mut listed = 0;

    for bp in free_list.iter(bytes) {
        listed += 1;
        if listed > free_list.len() || !listed_set.insert(bp) {
            violations.push(HeapViolation::FreeListCycle);
            return;
        }
        if bp < prologue + PROLOGUE_SIZE
            || bp % ALIGNMENT != 0
            || bp + MIN_BLOCK_SIZE > arena_bytes
        {
            violations.push(HeapViolation::OutOfRange { bp, arena_bytes });
            return;
        }
        if !chain_set.contains(&bp) {
            violations.push(HeapViolation::StrayFreeListNode { bp });
        }

        let hdr = header(bytes, bp);
        if hdr.allocated {
            violations.push(HeapViolation::AllocatedInFreeList { bp });
        }
        if hdr.size < previous_size {
            violations.push(HeapViolation::FreeListUnordered {
                bp,
                size: hdr.size,
                previous_size,
            });
        }
        let found = prev_link(bytes, bp);
        if found != expected_prev {
            violations.push(HeapViolation::BrokenBackLink {
                bp,
                expected: expected_prev,
                found,
            });
        }
        expected_prev = Some(bp);
        previous_size = hdr.size;
    }

    for &bp in chain_free {
        if !listed_set.contains(&bp) {
            violations.push(HeapViolation::FreeBlockNotListed { bp });
        }
    }
    if listed != chain_free.len() || listed != free_list.len() {
        violations.push(HeapViolation::FreeCountMismatch {
            listed,
            recorded: free_list.len(),
            in_chain: chain_free.len(),
        });
    }
}
