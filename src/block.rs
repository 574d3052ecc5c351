//! Boundary-tag codec.
//!
//! Every block starts with a header word and ends with a footer word, both
//! holding the same packed [`Tag`]. Free blocks keep their free-list links in
//! the first two payload words:
//!
//! ```text
//!   Free block:
//!   ┌────────┬────────┬────────┬──────────────┬────────┐
//!   │ header │  pred  │  succ  │     ...      │ footer │
//!   └────────┴────────┴────────┴──────────────┴────────┘
//!   ▲        ▲
//!   block    payload (8-byte aligned)
//! ```
//!
//! Blocks are addressed by the byte offset of their header from the heap
//! base, and links store that offset directly, so `0` is free to mean "none".

/// Allocation unit in bytes; every block size is counted in words.
pub const WSIZE: usize = 4;
/// Double word: the payload alignment and the block size granularity.
pub const DSIZE: usize = 8;
/// Header, two links and a footer.
pub const MIN_BLOCK_WORDS: usize = 4;

const ALLOC_BIT: u32 = 1 << 30;
const SIZE_MASK: u32 = ALLOC_BIT - 1;

/// Largest size, in words, a tag can describe.
pub const MAX_BLOCK_WORDS: usize = SIZE_MASK as usize;

const NO_LINK: u32 = 0;

/// Decoded contents of a header or footer word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
  pub size: usize,
  pub allocated: bool,
}

impl Tag {
  pub const PROLOGUE: Tag = Tag::used(2);
  pub const EPILOGUE: Tag = Tag::used(0);

  pub const fn free(size: usize) -> Self {
    Self { size, allocated: false }
  }

  pub const fn used(size: usize) -> Self {
    Self { size, allocated: true }
  }

  pub const fn encode(self) -> u32 {
    debug_assert!(self.size <= MAX_BLOCK_WORDS);

    let flag = if self.allocated { ALLOC_BIT } else { 0 };
    (self.size as u32 & SIZE_MASK) | flag
  }

  pub const fn decode(word: u32) -> Self {
    Self {
      size: (word & SIZE_MASK) as usize,
      allocated: word & ALLOC_BIT != 0,
    }
  }
}

pub(crate) fn read_word(
  heap: &[u8],
  offset: usize,
) -> u32 {
  debug_assert!(offset + WSIZE <= heap.len(), "word {offset:#x} outside heap");

  u32::from_ne_bytes([
    heap[offset],
    heap[offset + 1],
    heap[offset + 2],
    heap[offset + 3],
  ])
}

pub(crate) fn write_word(
  heap: &mut [u8],
  offset: usize,
  value: u32,
) {
  debug_assert!(offset + WSIZE <= heap.len(), "word {offset:#x} outside heap");

  heap[offset..offset + WSIZE].copy_from_slice(&value.to_ne_bytes());
}

/// A block, named by the heap offset of its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block(usize);

impl Block {
  pub const fn from_offset(offset: usize) -> Self {
    Self(offset)
  }

  pub const fn from_payload(payload: usize) -> Self {
    Self(payload - WSIZE)
  }

  pub const fn offset(self) -> usize {
    self.0
  }

  pub const fn payload(self) -> usize {
    self.0 + WSIZE
  }

  pub fn tag(
    self,
    heap: &[u8],
  ) -> Tag {
    Tag::decode(read_word(heap, self.0))
  }

  /// Size in words, header and footer included.
  pub fn size(
    self,
    heap: &[u8],
  ) -> usize {
    self.tag(heap).size
  }

  pub fn is_free(
    self,
    heap: &[u8],
  ) -> bool {
    !self.tag(heap).allocated
  }

  /// Offset of the footer word. A zero-size block is its own footer.
  pub fn footer(
    self,
    heap: &[u8],
  ) -> usize {
    match self.size(heap) {
      0 => self.0,
      size => self.0 + size * WSIZE - WSIZE,
    }
  }

  /// Writes `tag` to both the header and the footer.
  pub fn write(
    self,
    heap: &mut [u8],
    tag: Tag,
  ) {
    let word = tag.encode();
    write_word(heap, self.0, word);

    if tag.size > 0 {
      write_word(heap, self.0 + tag.size * WSIZE - WSIZE, word);
    }
  }

  pub fn next(
    self,
    heap: &[u8],
  ) -> Block {
    Block(self.0 + self.size(heap) * WSIZE)
  }

  /// The physically preceding block, found through its footer.
  pub fn prev(
    self,
    heap: &[u8],
  ) -> Block {
    let size = Tag::decode(read_word(heap, self.0 - WSIZE)).size;
    Block(self.0 - size * WSIZE)
  }

  pub fn pred(
    self,
    heap: &[u8],
  ) -> Option<Block> {
    decode_link(read_word(heap, self.0 + WSIZE))
  }

  pub fn succ(
    self,
    heap: &[u8],
  ) -> Option<Block> {
    decode_link(read_word(heap, self.0 + 2 * WSIZE))
  }

  pub fn set_pred(
    self,
    heap: &mut [u8],
    pred: Option<Block>,
  ) {
    write_word(heap, self.0 + WSIZE, encode_link(pred));
  }

  pub fn set_succ(
    self,
    heap: &mut [u8],
    succ: Option<Block>,
  ) {
    write_word(heap, self.0 + 2 * WSIZE, encode_link(succ));
  }
}

fn encode_link(link: Option<Block>) -> u32 {
  match link {
    Some(block) => {
      debug_assert!(block.0 != 0 && block.0 <= u32::MAX as usize);
      block.0 as u32
    }
    None => NO_LINK,
  }
}

fn decode_link(word: u32) -> Option<Block> {
  match word {
    NO_LINK => None,
    offset => Some(Block(offset as usize)),
  }
}

/// Physical walk from the first real block up to, not including, the
/// epilogue. Stops early instead of stepping outside the heap.
pub struct HeapWalk<'a> {
  heap: &'a [u8],
  cursor: Block,
}

impl<'a> HeapWalk<'a> {
  pub fn new(
    heap: &'a [u8],
    first: Block,
  ) -> Self {
    Self { heap, cursor: first }
  }
}

impl Iterator for HeapWalk<'_> {
  type Item = (Block, Tag);

  fn next(&mut self) -> Option<Self::Item> {
    if self.cursor.0 + WSIZE > self.heap.len() {
      return None;
    }

    let block = self.cursor;
    let tag = block.tag(self.heap);

    if tag.size == 0 || block.0 + tag.size * WSIZE > self.heap.len() {
      return None;
    }

    self.cursor = Block(block.0 + tag.size * WSIZE);
    Some((block, tag))
  }
}
