//! Heap error taxonomy.

use thiserror::Error;

/// Failures surfaced by heap setup and arena growth.
///
/// Public allocation entry points collapse these into `None`; [`HeapError`] is what
/// `init` returns and what lifecycle records carry in their details.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    /// The arena refused to grow.
    #[error("arena growth of {requested} bytes failed (arena holds {arena_bytes} bytes)")]
    OutOfMemory {
        requested: usize,
        arena_bytes: usize,
    },
    /// The arena grew, but not at the previous end of the managed region.
    #[error("arena growth returned offset {returned}, expected {expected}")]
    NonContiguousGrowth { expected: usize, returned: usize },
    /// The arena grew by a different amount than requested.
    #[error("arena growth of {requested} bytes extended the region by {grown} bytes")]
    GrowthSizeMismatch { requested: usize, grown: usize },
    /// Adding tag overhead and alignment padding to the request overflowed.
    #[error("request of {requested} bytes overflows block size arithmetic")]
    RequestOverflow { requested: usize },
    /// An operation ran before `init`.
    #[error("heap used before init")]
    NotInitialized,
}

impl HeapError {
    /// Short machine-readable label, used as a lifecycle outcome.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::OutOfMemory { .. } => "oom",
            Self::NonContiguousGrowth { .. } => "non_contiguous_growth",
            Self::GrowthSizeMismatch { .. } => "growth_size_mismatch",
            Self::RequestOverflow { .. } => "request_overflow",
            Self::NotInitialized => "not_initialized",
        }
    }
}
