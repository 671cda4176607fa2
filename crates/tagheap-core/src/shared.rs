//! One heap behind one lock.
//!
//! `Heap` itself is single-owner. `SharedHeap` serializes whole calls through a
//! `parking_lot::Mutex` so several threads can draw from the same arena; there is
//! no finer-grained locking.

use parking_lot::Mutex;

use crate::allocator::Heap;
use crate::arena::{Arena, VecArena};
use crate::check::HeapViolation;
use crate::config::HeapConfig;
use crate::error::HeapError;
use crate::lifecycle::HeapLogRecord;
use crate::stats::HeapStats;

pub struct SharedHeap<A: Arena = VecArena> {
    inner: Mutex<Heap<A>>,
}

impl SharedHeap<VecArena> {
    /// Initialized heap over a fresh `VecArena`.
    pub fn with_config(config: HeapConfig) -> Result<Self, HeapError> {
        Self::from_heap(Heap::with_config(config))
    }
}

impl<A: Arena> SharedHeap<A> {
    /// Take ownership of `heap`, initializing it if it is not yet.
    pub fn from_heap(mut heap: Heap<A>) -> Result<Self, HeapError> {
        if !heap.is_initialized() {
            heap.init()?;
        }
        Ok(Self {
            inner: Mutex::new(heap),
        })
    }

    pub fn allocate(&self, size: usize) -> Option<usize> {
        self.inner.lock().allocate(size)
    }

    pub fn release(&self, ptr: usize) {
        self.inner.lock().release(ptr);
    }

    pub fn resize(&self, ptr: usize, new_size: usize) -> Option<usize> {
        self.inner.lock().resize(ptr, new_size)
    }

    pub fn calloc(&self, count: usize, size: usize) -> Option<usize> {
        self.inner.lock().calloc(count, size)
    }

    /// Copy `data` into the live block at `ptr`. Returns false when `ptr` is not
    /// live or `data` does not fit.
    pub fn write(&self, ptr: usize, data: &[u8]) -> bool {
        let mut heap = self.inner.lock();
        match heap.payload_mut(ptr) {
            Some(payload) if payload.len() >= data.len() => {
                payload[..data.len()].copy_from_slice(data);
                true
            }
            _ => false,
        }
    }

    /// Copy of the first `len` payload bytes of the live block at `ptr`.
    pub fn read(&self, ptr: usize, len: usize) -> Option<Vec<u8>> {
        let heap = self.inner.lock();
        let payload = heap.payload(ptr)?;
        payload.get(..len).map(<[u8]>::to_vec)
    }

    pub fn check(&self) -> Vec<HeapViolation> {
        self.inner.lock().check()
    }

    pub fn stats(&self) -> HeapStats {
        self.inner.lock().stats()
    }

    pub fn drain_lifecycle_logs(&self) -> Vec<HeapLogRecord> {
        self.inner.lock().drain_lifecycle_logs()
    }

    /// Run `f` with the lock held for its whole duration.
    pub fn with_heap<R>(&self, f: impl FnOnce(&mut Heap<A>) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn into_inner(self) -> Heap<A> {
        self.inner.into_inner()
    }
}
