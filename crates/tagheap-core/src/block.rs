//! Block model: boundary tags and neighbour arithmetic.
//!
//! A block is addressed by its payload offset `bp`. Its header tag sits in the word
//! before the payload and its footer tag in the last word of the block:
//!
//! ```text
//!   bp - 8        bp                          bp + size - 16   bp + size - 8
//!   | header |    | payload ...               | footer |       | next header |
//! ```
//!
//! When the block is free, the first two payload words hold the free-list links.

/// Width of one tag word and one free-list link.
pub const WORD_SIZE: usize = 8;

/// Payload alignment and block-size granularity.
pub const ALIGNMENT: usize = 16;

/// Header plus footer.
pub const OVERHEAD: usize = 2 * WORD_SIZE;

/// Smallest legal block: both tags plus two full-width link slots.
pub const MIN_BLOCK_SIZE: usize = OVERHEAD + 2 * WORD_SIZE;

/// Size of the prologue sentinel (header and footer only).
pub const PROLOGUE_SIZE: usize = OVERHEAD;

const ALLOCATED_BIT: u64 = 0x1;

/// Decoded boundary tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMeta {
    /// Total block bytes, tags included.
    pub size: usize,
    /// Whether the block holds a live allocation.
    pub allocated: bool,
}

impl BlockMeta {
    #[must_use]
    pub const fn new(size: usize, allocated: bool) -> Self {
        Self { size, allocated }
    }

    #[must_use]
    pub const fn free(size: usize) -> Self {
        Self::new(size, false)
    }

    #[must_use]
    pub const fn used(size: usize) -> Self {
        Self::new(size, true)
    }

    /// Serialize into one tag word.
    ///
    /// Layout: little-endian `u64`; bit 0 is the allocated flag, the remaining bits
    /// are the size. Sizes are multiples of [`ALIGNMENT`], so bit 0 of a size is
    /// always clear.
    #[must_use]
    pub const fn to_word(self) -> u64 {
        (self.size as u64 & !ALLOCATED_BIT) | (self.allocated as u64)
    }

    /// Inverse of [`BlockMeta::to_word`].
    #[must_use]
    pub const fn from_word(word: u64) -> Self {
        Self {
            size: (word & !ALLOCATED_BIT) as usize,
            allocated: word & ALLOCATED_BIT != 0,
        }
    }
}

/// Round `value` up to the next multiple of [`ALIGNMENT`].
#[must_use]
pub const fn align_up(value: usize) -> Option<usize> {
    match value.checked_add(ALIGNMENT - 1) {
        Some(v) => Some(v & !(ALIGNMENT - 1)),
        None => None,
    }
}

/// Block size needed to hold a `request`-byte payload.
#[must_use]
pub fn adjusted_size(request: usize) -> Option<usize> {
    let asize = align_up(request.checked_add(OVERHEAD)?)?;
    Some(asize.max(MIN_BLOCK_SIZE))
}

/// Read one little-endian word at `offset`.
#[must_use]
pub fn read_word(bytes: &[u8], offset: usize) -> u64 {
    let mut word = [0u8; WORD_SIZE];
    word.copy_from_slice(&bytes[offset..offset + WORD_SIZE]);
    u64::from_le_bytes(word)
}

/// Write one little-endian word at `offset`.
pub fn write_word(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + WORD_SIZE].copy_from_slice(&value.to_le_bytes());
}

/// Decode the tag stored at `offset`.
#[must_use]
pub fn read_meta(bytes: &[u8], offset: usize) -> BlockMeta {
    BlockMeta::from_word(read_word(bytes, offset))
}

/// Encode `meta` at `offset`.
pub fn write_meta(bytes: &mut [u8], offset: usize, meta: BlockMeta) {
    write_word(bytes, offset, meta.to_word());
}

#[must_use]
pub const fn header_offset(bp: usize) -> usize {
    bp - WORD_SIZE
}

#[must_use]
pub const fn footer_offset(bp: usize, size: usize) -> usize {
    bp + size - OVERHEAD
}

/// Header tag of the block at `bp`.
#[must_use]
pub fn header(bytes: &[u8], bp: usize) -> BlockMeta {
    read_meta(bytes, header_offset(bp))
}

/// Footer tag of the block at `bp`, located through its header size.
#[must_use]
pub fn footer(bytes: &[u8], bp: usize) -> BlockMeta {
    let size = header(bytes, bp).size;
    read_meta(bytes, footer_offset(bp, size))
}

#[must_use]
pub fn block_size(bytes: &[u8], bp: usize) -> usize {
    header(bytes, bp).size
}

#[must_use]
pub fn is_allocated(bytes: &[u8], bp: usize) -> bool {
    header(bytes, bp).allocated
}

/// Write identical header and footer tags for the block at `bp`.
///
/// The footer position follows from `meta.size`, so resizing a block is a single
/// `set_meta` call with the new size.
pub fn set_meta(bytes: &mut [u8], bp: usize, meta: BlockMeta) {
    write_meta(bytes, header_offset(bp), meta);
    write_meta(bytes, footer_offset(bp, meta.size), meta);
}

/// Payload offset of the block physically after `bp`.
#[must_use]
pub fn next_block(bytes: &[u8], bp: usize) -> usize {
    bp + block_size(bytes, bp)
}

/// Tag of the block physically before `bp`, read from its footer.
#[must_use]
pub fn prev_meta(bytes: &[u8], bp: usize) -> BlockMeta {
    read_meta(bytes, bp - OVERHEAD)
}

/// Payload offset of the block physically before `bp`.
#[must_use]
pub fn prev_block(bytes: &[u8], bp: usize) -> usize {
    bp - prev_meta(bytes, bp).size
}

/// Usable payload bytes of a block of `size` total bytes.
#[must_use]
pub const fn payload_capacity(size: usize) -> usize {
    size - OVERHEAD
}
