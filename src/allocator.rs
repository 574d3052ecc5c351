use std::ptr;

use log::{debug, trace, warn};

use crate::{
  DSIZE, HeapConfig, HeapError, MIN_BLOCK_WORDS, Result, WSIZE, align,
  block::{Block, HeapWalk, MAX_BLOCK_WORDS, Tag},
  config::SENTINEL_BYTES,
  memlib::{HeapProvider, MemLib},
  seglist::{CLASS_COUNT, SegList, class_of},
};

/// Element sizes below this are raised to it by `allocate_zeroed`.
const MIN_ZEROED_ELEMENT: usize = 4;

/// Block size, in words, needed to serve a `size` byte request.
fn adjusted_words(size: usize) -> Option<usize> {
  let bytes = if size <= MIN_BLOCK_WORDS * WSIZE - DSIZE {
    MIN_BLOCK_WORDS * WSIZE
  } else {
    let padded = size.checked_add(DSIZE + DSIZE - 1)?;
    align!(padded - (DSIZE - 1))
  };

  Some(bytes / WSIZE).filter(|&words| words <= MAX_BLOCK_WORDS)
}

/// One physical block as seen by [`SegAllocator::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Offset of the header from the heap base.
  pub offset: usize,
  /// Whole block size in bytes, header and footer included.
  pub size: usize,
  pub allocated: bool,
}

/// Occupancy summary produced by [`SegAllocator::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  pub heap_bytes: usize,
  pub allocated_blocks: usize,
  pub allocated_bytes: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  /// Number of free blocks per size class.
  pub class_counts: [usize; CLASS_COUNT],
}

/// Segregated-fit allocator with boundary tags and immediate coalescing.
///
/// Owns its heap provider and the free-list heads; nothing is global. The
/// allocator is single-threaded: callers sharing it across threads must
/// serialize access themselves.
pub struct SegAllocator<P: HeapProvider = MemLib> {
  pub(crate) provider: P,
  pub(crate) free_lists: SegList,
  pub(crate) prologue: Block,
  config: HeapConfig,
}

impl SegAllocator<MemLib> {
  pub fn new() -> Result<Self> {
    Self::with_config(HeapConfig::default())
  }

  pub fn with_config(config: HeapConfig) -> Result<Self> {
    config.validate()?;
    let provider = MemLib::new(config.max_heap_bytes)?;
    Self::with_provider(provider, config)
  }
}

impl<P: HeapProvider> SegAllocator<P> {
  /// Lays the sentinels and the first free chunk out on `provider`.
  pub fn with_provider(
    mut provider: P,
    config: HeapConfig,
  ) -> Result<Self> {
    config.validate()?;

    let start = provider.extend(SENTINEL_BYTES)?;
    if (provider.base().addr() + start) % DSIZE != 0 {
      return Err(HeapError::InvalidConfig("heap break must be double-word aligned"));
    }

    let heap = provider.bytes_mut();
    heap[start..start + WSIZE].fill(0);
    let prologue = Block::from_offset(start + WSIZE);
    prologue.write(heap, Tag::PROLOGUE);
    prologue.next(heap).write(heap, Tag::EPILOGUE);

    let mut allocator = Self {
      provider,
      free_lists: SegList::new(),
      prologue,
      config,
    };

    let chunk = allocator.extend_heap(config.chunk())?;
    allocator.free_lists.insert(allocator.provider.bytes_mut(), chunk);
    debug!("heap initialised: {} bytes, first chunk at {:#x}", allocator.heap_size(), chunk.offset());

    Ok(allocator)
  }

  /// Returns a double-word aligned pointer to at least `size` usable
  /// bytes, or null when `size` is zero or the heap cannot grow.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    if size == 0 {
      return ptr::null_mut();
    }

    match self.allocate_block(size) {
      Ok(block) => {
        trace!("allocate({size}) -> block {:#x}", block.offset());
        self.payload_ptr(block)
      }
      Err(err) => {
        warn!("allocate({size}) failed: {err}");
        ptr::null_mut()
      }
    }
  }

  /// Frees the block behind `ptr` and merges it with free neighbours.
  /// Null is ignored; pointers outside the heap are rejected.
  pub fn release(
    &mut self,
    ptr: *mut u8,
  ) -> Result<()> {
    if ptr.is_null() {
      return Ok(());
    }

    let block = self.block_of(ptr)?;
    let heap = self.provider.bytes_mut();
    let size = block.size(heap);
    block.write(heap, Tag::free(size));

    let merged = self.coalesce(block);
    self.free_lists.insert(self.provider.bytes_mut(), merged);
    trace!("release({:#x}) -> free block {:#x}", block.offset(), merged.offset());

    Ok(())
  }

  /// Resizes the allocation behind `ptr`.
  ///
  /// Shrinking, or growing within the current block, keeps the pointer and
  /// splits off any usable tail. Otherwise the payload moves to a fresh
  /// block and the old one is released. On heap exhaustion the old block
  /// is left untouched and null is returned.
  pub fn reallocate(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> Result<*mut u8> {
    if size == 0 {
      self.release(ptr)?;
      return Ok(ptr::null_mut());
    }
    if ptr.is_null() {
      return Ok(self.allocate(size));
    }

    let block = self.block_of(ptr)?;
    let Some(words) = adjusted_words(size) else {
      warn!("reallocate({size}) exceeds the largest block");
      return Ok(ptr::null_mut());
    };

    let old_words = block.size(self.provider.bytes());
    if old_words >= words {
      self.place(block, words);
      trace!("reallocate({size}) kept block {:#x} in place", block.offset());
      return Ok(ptr);
    }

    let new_ptr = self.allocate(size);
    if new_ptr.is_null() {
      return Ok(new_ptr);
    }

    let from = block.payload();
    let to = new_ptr.addr() - self.provider.base().addr();
    let len = (old_words * WSIZE - DSIZE).min(size);
    self.provider.bytes_mut().copy_within(from..from + len, to);

    self.release(ptr)?;
    trace!("reallocate({size}) moved block {:#x} to {:#x}", block.offset(), to - WSIZE);

    Ok(new_ptr)
  }

  /// Allocates room for `count` elements of `size` bytes and zero-fills it.
  pub fn allocate_zeroed(
    &mut self,
    count: usize,
    size: usize,
  ) -> *mut u8 {
    let bytes = count.saturating_mul(size.max(MIN_ZEROED_ELEMENT));

    let ptr = self.allocate(bytes);
    if !ptr.is_null() {
      let from = ptr.addr() - self.provider.base().addr();
      self.provider.bytes_mut()[from..from + bytes].fill(0);
    }

    ptr
  }

  /// Bytes the caller may use behind `ptr`.
  pub fn usable_size(
    &self,
    ptr: *mut u8,
  ) -> Result<usize> {
    let block = self.block_of(ptr)?;
    Ok(block.size(self.provider.bytes()) * WSIZE - DSIZE)
  }

  /// Current extent of the heap, sentinels included.
  pub fn heap_size(&self) -> usize {
    self.provider.len()
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  /// Physical blocks in address order, sentinels excluded.
  pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
    HeapWalk::new(self.provider.bytes(), self.first_block()).map(|(block, tag)| BlockInfo {
      offset: block.offset(),
      size: tag.size * WSIZE,
      allocated: tag.allocated,
    })
  }

  pub fn stats(&self) -> HeapStats {
    let mut stats = HeapStats {
      heap_bytes: self.heap_size(),
      ..HeapStats::default()
    };

    for info in self.blocks() {
      if info.allocated {
        stats.allocated_blocks += 1;
        stats.allocated_bytes += info.size;
      } else {
        stats.free_blocks += 1;
        stats.free_bytes += info.size;
        stats.class_counts[class_of(info.size / WSIZE)] += 1;
      }
    }

    stats
  }

  pub(crate) fn first_block(&self) -> Block {
    Block::from_offset(self.prologue.offset() + Tag::PROLOGUE.size * WSIZE)
  }

  fn payload_ptr(
    &self,
    block: Block,
  ) -> *mut u8 {
    self.provider.base().wrapping_add(block.payload())
  }

  /// Maps a payload pointer back to its allocated block.
  fn block_of(
    &self,
    ptr: *mut u8,
  ) -> Result<Block> {
    let addr = ptr.addr();
    let (low, high) = self.provider.bounds();
    let invalid = || {
      warn!("rejected pointer {addr:#x} outside heap [{low:#x}, {high:#x})");
      HeapError::InvalidPointer(addr)
    };

    let first_payload = low + self.first_block().payload();
    if addr < first_payload || addr >= high || addr % DSIZE != 0 {
      return Err(invalid());
    }

    let heap = self.provider.bytes();
    let block = Block::from_payload(addr - low);
    let tag = block.tag(heap);
    if !tag.allocated || tag.size < MIN_BLOCK_WORDS || block.offset() + tag.size * WSIZE > heap.len() - WSIZE {
      return Err(invalid());
    }

    Ok(block)
  }

  fn allocate_block(
    &mut self,
    size: usize,
  ) -> Result<Block> {
    let words = adjusted_words(size).ok_or(HeapError::OutOfMemory { requested: size })?;

    if let Some(block) = self.free_lists.find_fit(self.provider.bytes(), words) {
      self.free_lists.remove(self.provider.bytes_mut(), block);
      self.place(block, words);
      return Ok(block);
    }

    let block = self.extend_heap(words.max(self.config.chunk()))?;
    self.place(block, words);
    Ok(block)
  }

  /// Grows the heap by `words` and turns the new space into one free block
  /// that starts on the old epilogue. The block is not inserted.
  fn extend_heap(
    &mut self,
    words: usize,
  ) -> Result<Block> {
    let words = align!(words, 2);
    let bytes = words * WSIZE;
    let old_brk = self.provider.extend(bytes)?;

    let heap = self.provider.bytes_mut();
    let block = Block::from_offset(old_brk - WSIZE);
    block.write(heap, Tag::free(words));
    block.next(heap).write(heap, Tag::EPILOGUE);

    debug!("heap grown by {bytes} bytes to {}", heap.len());
    Ok(block)
  }

  /// Marks `block` allocated with `words`, splitting off the tail as a free
  /// block when it is large enough to stand alone. `block` must not be on
  /// any free list.
  fn place(
    &mut self,
    block: Block,
    words: usize,
  ) {
    let heap = self.provider.bytes_mut();
    let total = block.size(heap);

    if total - words < MIN_BLOCK_WORDS {
      block.write(heap, Tag::used(total));
      return;
    }

    block.write(heap, Tag::used(words));
    let rest = block.next(heap);
    rest.write(heap, Tag::free(total - words));

    let rest = self.coalesce(rest);
    self.free_lists.insert(self.provider.bytes_mut(), rest);
  }

  /// Merges the free, unlisted `block` with its free neighbours. The merged
  /// block starts at the lowest address of the run and is not listed.
  fn coalesce(
    &mut self,
    block: Block,
  ) -> Block {
    let heap = self.provider.bytes_mut();
    let prev = block.prev(heap);
    let next = block.next(heap);
    let size = block.size(heap);

    match (prev.is_free(heap), next.is_free(heap)) {
      (false, false) => block,
      (true, false) => {
        self.free_lists.remove(heap, prev);
        let merged = prev.size(heap) + size;
        prev.write(heap, Tag::free(merged));
        prev
      }
      (false, true) => {
        self.free_lists.remove(heap, next);
        let merged = size + next.size(heap);
        block.write(heap, Tag::free(merged));
        block
      }
      (true, true) => {
        self.free_lists.remove(heap, prev);
        self.free_lists.remove(heap, next);
        let merged = prev.size(heap) + size + next.size(heap);
        prev.write(heap, Tag::free(merged));
        prev
      }
    }
  }
}
