//! Explicit free list.
//!
//! A doubly linked list threaded through the payloads of free blocks and kept in
//! ascending size order, so the first fit found from the head is also the smallest
//! block the search can reach. Link words hold full-width payload offsets; `0`
//! encodes "no link" because no payload ever starts at offset 0.

use crate::block::{WORD_SIZE, block_size, read_word, write_word};

const NIL: u64 = 0;

fn decode_link(word: u64) -> Option<usize> {
    if word == NIL { None } else { Some(word as usize) }
}

fn encode_link(link: Option<usize>) -> u64 {
    link.map_or(NIL, |bp| bp as u64)
}

/// Previous-in-list link stored in the free block at `bp`.
#[must_use]
pub fn prev_link(bytes: &[u8], bp: usize) -> Option<usize> {
    decode_link(read_word(bytes, bp))
}

/// Next-in-list link stored in the free block at `bp`.
#[must_use]
pub fn next_link(bytes: &[u8], bp: usize) -> Option<usize> {
    decode_link(read_word(bytes, bp + WORD_SIZE))
}

fn set_prev_link(bytes: &mut [u8], bp: usize, link: Option<usize>) {
    write_word(bytes, bp, encode_link(link));
}

fn set_next_link(bytes: &mut [u8], bp: usize, link: Option<usize>) {
    write_word(bytes, bp + WORD_SIZE, encode_link(link));
}

/// Head of the size-ordered free list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeList {
    head: Option<usize>,
    len: usize,
}

impl FreeList {
    #[must_use]
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    /// Smallest free block, if any.
    #[must_use]
    pub fn head(&self) -> Option<usize> {
        self.head
    }

    /// Number of linked blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Forget every node. The blocks themselves are untouched.
    pub fn clear(&mut self) {
        self.head = None;
        self.len = 0;
    }

    /// Link the free block at `bp` before the first node strictly larger than it.
    ///
    /// Equal sizes keep arrival order: a new block joins the end of its size class.
    pub fn insert(&mut self, bytes: &mut [u8], bp: usize) {
        let size = block_size(bytes, bp);
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(node) = cursor {
            if block_size(bytes, node) > size {
                break;
            }
            prev = Some(node);
            cursor = next_link(bytes, node);
        }

        set_prev_link(bytes, bp, prev);
        set_next_link(bytes, bp, cursor);
        match prev {
            Some(p) => set_next_link(bytes, p, Some(bp)),
            None => self.head = Some(bp),
        }
        if let Some(n) = cursor {
            set_prev_link(bytes, n, Some(bp));
        }
        self.len += 1;
    }

    /// Unlink the free block at `bp` using its stored links.
    pub fn remove(&mut self, bytes: &mut [u8], bp: usize) {
        let prev = prev_link(bytes, bp);
        let next = next_link(bytes, bp);
        match prev {
            Some(p) => set_next_link(bytes, p, next),
            None => self.head = next,
        }
        if let Some(n) = next {
            set_prev_link(bytes, n, prev);
        }
        self.len = self.len.saturating_sub(1);
    }

    /// First block from the head whose size is at least `asize`.
    #[must_use]
    pub fn find_fit(&self, bytes: &[u8], asize: usize) -> Option<usize> {
        self.iter(bytes).find(|&bp| block_size(bytes, bp) >= asize)
    }

    /// Walk the list from the head.
    ///
    /// The walk stops after `len + 1` nodes so a corrupted cycle cannot hang the
    /// caller; the consistency checker relies on seeing that extra node.
    #[must_use]
    pub fn iter<'a>(&self, bytes: &'a [u8]) -> FreeListIter<'a> {
        FreeListIter {
            bytes,
            cursor: self.head,
            remaining: self.len + 1,
        }
    }
}

/// Iterator over free-list payload offsets, head first.
pub struct FreeListIter<'a> {
    bytes: &'a [u8],
    cursor: Option<usize>,
    remaining: usize,
}

impl Iterator for FreeListIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.cursor?;
        self.remaining -= 1;
        self.cursor = if node + 2 * WORD_SIZE <= self.bytes.len() {
            next_link(self.bytes, node)
        } else {
            None
        };
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockMeta, set_meta};

    /// Lay out free blocks of the given sizes back to back starting at payload 32.
    fn carve(sizes: &[usize]) -> (Vec<u8>, Vec<usize>) {
        let total: usize = sizes.iter().sum();
        let mut bytes = vec![0u8; 32 + total + 16];
        let mut bp = 32;
        let mut out = Vec::new();
        for &size in sizes {
            set_meta(&mut bytes, bp, BlockMeta::free(size));
            out.push(bp);
            bp += size;
        }
        (bytes, out)
    }

    fn sizes_in_order(list: &FreeList, bytes: &[u8]) -> Vec<usize> {
        list.iter(bytes).map(|bp| block_size(bytes, bp)).collect()
    }

    #[test]
    fn insert_keeps_ascending_order() {
        let (mut bytes, bps) = carve(&[96, 32, 64, 48]);
        let mut list = FreeList::new();
        for &bp in &bps {
            list.insert(&mut bytes, bp);
        }
        assert_eq!(sizes_in_order(&list, &bytes), vec![32, 48, 64, 96]);
        assert_eq!(list.len(), 4);
        assert_eq!(list.head(), Some(bps[1]));
    }

    #[test]
    fn equal_sizes_join_end_of_class() {
        let (mut bytes, bps) = carve(&[48, 48, 32, 48]);
        let mut list = FreeList::new();
        for &bp in &bps {
            list.insert(&mut bytes, bp);
        }
        let order: Vec<usize> = list.iter(&bytes).collect();
        assert_eq!(order, vec![bps[2], bps[0], bps[1], bps[3]]);
    }

    #[test]
    fn remove_head_middle_and_tail() {
        let (mut bytes, bps) = carve(&[32, 48, 64]);
        let mut list = FreeList::new();
        for &bp in &bps {
            list.insert(&mut bytes, bp);
        }

        list.remove(&mut bytes, bps[1]);
        assert_eq!(sizes_in_order(&list, &bytes), vec![32, 64]);
        assert_eq!(prev_link(&bytes, bps[2]), Some(bps[0]));

        list.remove(&mut bytes, bps[0]);
        assert_eq!(list.head(), Some(bps[2]));
        assert_eq!(prev_link(&bytes, bps[2]), None);

        list.remove(&mut bytes, bps[2]);
        assert!(list.is_empty());
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn find_fit_returns_smallest_sufficient_block() {
        let (mut bytes, bps) = carve(&[128, 32, 64]);
        let mut list = FreeList::new();
        for &bp in &bps {
            list.insert(&mut bytes, bp);
        }
        assert_eq!(list.find_fit(&bytes, 48), Some(bps[2]));
        assert_eq!(list.find_fit(&bytes, 32), Some(bps[1]));
        assert_eq!(list.find_fit(&bytes, 129), None);
    }

    #[test]
    fn iter_is_bounded_on_a_cycle() {
        let (mut bytes, bps) = carve(&[32, 48]);
        let mut list = FreeList::new();
        list.insert(&mut bytes, bps[0]);
        list.insert(&mut bytes, bps[1]);
        set_next_link(&mut bytes, bps[1], Some(bps[0]));
        assert_eq!(list.iter(&bytes).count(), 3);
    }
}
