//! # tagheap-core
//!
//! A boundary-tag heap allocator that manages one growable byte arena.
//!
//! Blocks carry their size and allocation state twice (header and footer), free
//! blocks are threaded onto an explicit, size-ordered, doubly linked free list whose
//! links live inside the free payload bytes, and neighbouring free blocks are merged
//! eagerly. Addresses handed to callers are byte offsets into the arena; offset `0`
//! is the null sentinel.
//!
//! No `unsafe` code is permitted at the crate level: the arena is a bounds-checked
//! buffer and every link is an integer offset.

#![deny(unsafe_code)]

pub mod allocator;
pub mod arena;
pub mod block;
pub mod check;
pub mod config;
pub mod error;
pub mod free_list;
pub mod lifecycle;
pub mod shared;
pub mod stats;

pub use allocator::{Heap, HeapCounters};
pub use arena::{Arena, DEFAULT_MAX_ARENA_BYTES, VecArena};
pub use block::{ALIGNMENT, BlockMeta, MIN_BLOCK_SIZE, OVERHEAD, WORD_SIZE};
pub use check::HeapViolation;
pub use config::{CheckLevel, HeapConfig, PlacementPolicy, SplitSide};
pub use error::HeapError;
pub use free_list::FreeList;
pub use lifecycle::{HeapLogLevel, HeapLogRecord};
pub use shared::SharedHeap;
pub use stats::HeapStats;
