use crate::{HeapError, MIN_BLOCK_WORDS, Result, WSIZE};

/// Minimum growth step, in words, when no free block fits.
pub const DEFAULT_CHUNK_WORDS: usize = 1 << 6;
/// Default reservation backing the heap (20 MiB).
pub const DEFAULT_MAX_HEAP_BYTES: usize = 20 * (1 << 20);

/// Pad word, prologue header and footer, epilogue header.
pub(crate) const SENTINEL_BYTES: usize = 4 * WSIZE;

/// Tuning knobs for a [`SegAllocator`](crate::SegAllocator).
///
/// ```rust
/// use segalloc::HeapConfig;
///
/// let config = HeapConfig::default()
///   .with_chunk_words(256)
///   .with_max_heap_bytes(1 << 20);
///
/// assert_eq!(config.chunk_words, 256);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  /// Growth step in words; odd values are rounded up to keep alignment.
  pub chunk_words: usize,
  /// Upper bound of the region reserved from the OS.
  pub max_heap_bytes: usize,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      chunk_words: DEFAULT_CHUNK_WORDS,
      max_heap_bytes: DEFAULT_MAX_HEAP_BYTES,
    }
  }
}

impl HeapConfig {
  pub fn with_chunk_words(
    mut self,
    chunk_words: usize,
  ) -> Self {
    self.chunk_words = chunk_words;
    self
  }

  pub fn with_max_heap_bytes(
    mut self,
    max_heap_bytes: usize,
  ) -> Self {
    self.max_heap_bytes = max_heap_bytes;
    self
  }

  /// Growth step in words, rounded to an even count.
  pub(crate) fn chunk(&self) -> usize {
    crate::align!(self.chunk_words, 2)
  }

  pub(crate) fn validate(&self) -> Result<()> {
    if self.chunk_words < MIN_BLOCK_WORDS {
      return Err(HeapError::InvalidConfig("chunk must hold at least one minimum block"));
    }
    if self.max_heap_bytes > u32::MAX as usize {
      return Err(HeapError::InvalidConfig("heap offsets must fit in 32-bit links"));
    }
    if self.chunk_words > self.max_heap_bytes / WSIZE {
      return Err(HeapError::InvalidConfig("chunk larger than the heap reservation"));
    }
    if self.max_heap_bytes < SENTINEL_BYTES + self.chunk() * WSIZE {
      return Err(HeapError::InvalidConfig("heap reservation too small for the initial chunk"));
    }
    Ok(())
  }
}
