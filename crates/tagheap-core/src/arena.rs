//! Arena growth collaborator.
//!
//! The heap never owns raw memory directly. It asks an [`Arena`] to extend the
//! managed region and then reads and writes that region as a plain byte slice, so
//! every metadata access is bounds-checked.

/// Default ceiling for [`VecArena`] growth: 20 MiB.
pub const DEFAULT_MAX_ARENA_BYTES: usize = 20 * 1024 * 1024;

/// A contiguous, monotonically growing byte region.
///
/// Contract for `grow`: on success the region is exactly `increment` bytes longer
/// and the returned offset is the previous end of the region. Implementations
/// report exhaustion with `None` and must leave the region unchanged in that case.
///
/// "Exactly" is stricter than a `sbrk`-style "at least": the heap writes its new
/// epilogue at `start + increment`, so it treats any other length as a broken
/// arena (`HeapError::GrowthSizeMismatch`) and stops serving requests.
pub trait Arena {
    /// Extend the region by `increment` bytes, returning the start of the extension.
    fn grow(&mut self, increment: usize) -> Option<usize>;

    /// Drop the whole region. Only `Heap::init` calls this, to begin a fresh run.
    fn reset(&mut self);

    /// The managed region.
    fn bytes(&self) -> &[u8];

    /// The managed region, mutably.
    fn bytes_mut(&mut self) -> &mut [u8];

    /// Current region length in bytes.
    fn len(&self) -> usize {
        self.bytes().len()
    }

    /// Whether the region is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `Vec<u8>`-backed arena with a hard byte ceiling.
#[derive(Debug, Clone)]
pub struct VecArena {
    buf: Vec<u8>,
    max_bytes: usize,
    grow_calls: u64,
}

impl VecArena {
    /// Arena that can grow up to [`DEFAULT_MAX_ARENA_BYTES`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_ARENA_BYTES)
    }

    /// Arena that refuses to grow past `max_bytes`.
    #[must_use]
    pub fn with_limit(max_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_bytes,
            grow_calls: 0,
        }
    }

    /// Configured ceiling.
    #[must_use]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Number of successful `grow` calls since the last reset.
    #[must_use]
    pub fn grow_calls(&self) -> u64 {
        self.grow_calls
    }
}

impl Default for VecArena {
    fn default() -> Self {
        Self::new()
    }
}

impl Arena for VecArena {
    fn grow(&mut self, increment: usize) -> Option<usize> {
        let old_len = self.buf.len();
        let new_len = old_len.checked_add(increment)?;
        if new_len > self.max_bytes {
            return None;
        }
        self.buf.resize(new_len, 0);
        self.grow_calls += 1;
        Some(old_len)
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.grow_calls = 0;
    }

    fn bytes(&self) -> &[u8] {
        &self.buf
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_returns_previous_end() {
        let mut arena = VecArena::new();
        assert_eq!(arena.grow(32), Some(0));
        assert_eq!(arena.grow(64), Some(32));
        assert_eq!(arena.len(), 96);
        assert_eq!(arena.grow_calls(), 2);
    }

    #[test]
    fn grow_past_limit_fails_without_side_effects() {
        let mut arena = VecArena::with_limit(100);
        assert_eq!(arena.grow(64), Some(0));
        assert_eq!(arena.grow(64), None);
        assert_eq!(arena.len(), 64);
        assert_eq!(arena.grow_calls(), 1);
    }

    #[test]
    fn grow_overflow_is_refused() {
        let mut arena = VecArena::with_limit(usize::MAX);
        assert_eq!(arena.grow(16), Some(0));
        assert_eq!(arena.grow(usize::MAX), None);
    }

    #[test]
    fn extension_is_zeroed_and_reset_clears() {
        let mut arena = VecArena::new();
        arena.grow(16);
        arena.bytes_mut()[3] = 7;
        arena.grow(16);
        assert!(arena.bytes()[16..].iter().all(|&b| b == 0));
        arena.reset();
        assert!(arena.is_empty());
        assert_eq!(arena.grow_calls(), 0);
    }
}
