use thiserror::Error;

/// Errors surfaced by the allocator and its heap provider.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
  #[error("out of memory: could not grow the heap by {requested} bytes")]
  OutOfMemory { requested: usize },

  #[error("pointer {0:#x} does not belong to an allocated block of this heap")]
  InvalidPointer(usize),

  #[error("invalid heap configuration: {0}")]
  InvalidConfig(&'static str),
}

pub type Result<T> = std::result::Result<T, HeapError>;
