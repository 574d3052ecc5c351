//! # segalloc - A Segregated-Fit Memory Allocator
//!
//! This crate provides a **segregated free list** allocator with boundary
//! tags and immediate coalescing, running on a single heap region that grows
//! like `sbrk(2)` and never shrinks.
//!
//! ## Overview
//!
//! ```text
//!   Heap Region:
//!
//!   ┌─────┬──────────┬─────────┬────────┬──────────┬─────────┬──────────┐
//!   │ pad │ prologue │ block A │ free F │ block B  │   ...   │ epilogue │
//!   └─────┴──────────┴─────────┴────────┴──────────┴─────────┴──────────┘
//!   ▲                                                                   ▲
//!   heap base                                                       break
//!
//!   Free List Index (one LIFO list per size class, sizes in words):
//!
//!   [<4] [<8] [<16] [<32] ──► F ──► ...
//!   [<64] [<128] ... [<4096] [≥4096]
//! ```
//!
//! - `allocate` searches the class of the request and then larger classes
//!   only, taking the first block that fits and splitting off the tail when
//!   it can stand alone as a block.
//! - `release` merges the block with any free physical neighbour at once,
//!   so two free blocks are never adjacent.
//! - When nothing fits, the heap grows by at least one chunk.
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - Alignment macro (align!)
//!   ├── block      - Boundary-tag codec and heap walk
//!   ├── seglist    - Size classes and the free list index
//!   ├── allocator  - SegAllocator: allocate / release / reallocate
//!   ├── check      - Whole-heap consistency checker
//!   ├── memlib     - HeapProvider trait and the mmap-backed MemLib
//!   ├── config     - HeapConfig
//!   └── error      - HeapError
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::SegAllocator;
//!
//! let mut allocator = SegAllocator::new().unwrap();
//!
//! let ptr = allocator.allocate(64) as *mut u64;
//! unsafe { *ptr = 42 };
//!
//! let ptr = allocator.reallocate(ptr.cast(), 256).unwrap() as *mut u64;
//! assert_eq!(unsafe { *ptr }, 42);
//!
//! allocator.release(ptr.cast()).unwrap();
//! assert!(allocator.check_heap().is_empty());
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no internal locking.
//! - **One heap per allocator**: memory goes back to the OS only when the
//!   allocator is dropped.
//! - **Double-word alignment**: payloads are 8-byte aligned, nothing more.
//! - **Unix-only**: the default provider reserves its region with `mmap`.

pub mod align;
mod allocator;
mod block;
mod check;
mod config;
mod error;
mod memlib;
mod seglist;

pub use allocator::{BlockInfo, HeapStats, SegAllocator};
pub use block::{DSIZE, MIN_BLOCK_WORDS, Tag, WSIZE};
pub use check::Violation;
pub use config::{DEFAULT_CHUNK_WORDS, DEFAULT_MAX_HEAP_BYTES, HeapConfig};
pub use error::{HeapError, Result};
pub use memlib::{HeapProvider, MemLib};
pub use seglist::{CLASS_COUNT, class_bounds, class_of};
