//! Whole-heap consistency checker.
//!
//! Walks every block between the prologue and the epilogue, then every free
//! list, and reports each broken invariant it finds. Never called from the
//! allocation paths.

use std::collections::BTreeSet;

use log::warn;
use thiserror::Error;

use crate::{
  DSIZE, MIN_BLOCK_WORDS, SegAllocator, WSIZE,
  block::{Block, Tag, read_word},
  memlib::HeapProvider,
  seglist::{CLASS_COUNT, class_bounds, class_of},
};

/// A broken heap invariant. Offsets are relative to the heap base.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
  #[error("bad prologue at {0:#x}")]
  BadPrologue(usize),

  #[error("bad or missing epilogue at {0:#x}")]
  BadEpilogue(usize),

  #[error("block {0:#x} extends past the heap")]
  OutOfBounds(usize),

  #[error("block {0:#x} has a neighbour outside the heap")]
  NeighbourOutOfBounds(usize),

  #[error("block {0:#x} payload is not double-word aligned")]
  Misaligned(usize),

  #[error("block {block:#x} has size {size} words, below the minimum or odd")]
  BadSize { block: usize, size: usize },

  #[error("block {block:#x} header {header:#x} does not match footer {footer:#x}")]
  HeaderFooterMismatch { block: usize, header: u32, footer: u32 },

  #[error("free blocks {first:#x} and {second:#x} are adjacent")]
  AdjacentFree { first: usize, second: usize },

  #[error("free block {0:#x} has inconsistent list links")]
  BrokenLink(usize),

  #[error("free block {block:#x} of {size} words sits in class {class}")]
  WrongClass { block: usize, size: usize, class: usize },

  #[error("free block {0:#x} is not on any free list")]
  NotListed(usize),

  #[error("free list {class} holds {block:#x}, which is not a free block")]
  StaleListEntry { block: usize, class: usize },

  #[error("block {0:#x} appears on the free lists more than once")]
  ListedTwice(usize),
}

impl<P: HeapProvider> SegAllocator<P> {
  /// Validates every heap invariant, returning all violations found. An
  /// empty result means the heap is consistent.
  pub fn check_heap(&self) -> Vec<Violation> {
    let heap = self.provider.bytes();
    let base = self.provider.base().addr();
    let mut violations = Vec::new();

    let prologue = self.prologue;
    if prologue.tag(heap) != Tag::PROLOGUE || read_word(heap, prologue.offset() + WSIZE) != Tag::PROLOGUE.encode() {
      violations.push(Violation::BadPrologue(prologue.offset()));
    }

    let free = self.walk_blocks(heap, base, &mut violations);
    self.walk_lists(heap, &free, &mut violations);

    for violation in &violations {
      warn!("heap check: {violation}");
    }
    violations
  }

  /// Physical pass. Returns the free blocks it met.
  fn walk_blocks(
    &self,
    heap: &[u8],
    base: usize,
    violations: &mut Vec<Violation>,
  ) -> BTreeSet<Block> {
    let mut free = BTreeSet::new();
    let mut prev_free: Option<Block> = None;
    let mut block = self.first_block();

    loop {
      let offset = block.offset();
      if offset + WSIZE > heap.len() {
        violations.push(Violation::BadEpilogue(offset));
        break;
      }

      let tag = block.tag(heap);
      if tag.size == 0 {
        if !tag.allocated || offset + WSIZE != heap.len() {
          violations.push(Violation::BadEpilogue(offset));
        }
        break;
      }

      if offset + tag.size * WSIZE > heap.len() - WSIZE {
        violations.push(Violation::OutOfBounds(offset));
        break;
      }

      let prev_size = Tag::decode(read_word(heap, offset - WSIZE)).size;
      if prev_size * WSIZE > offset - self.prologue.offset() {
        violations.push(Violation::NeighbourOutOfBounds(offset));
      }

      if (base + block.payload()) % DSIZE != 0 {
        violations.push(Violation::Misaligned(offset));
      }

      if tag.size < MIN_BLOCK_WORDS || tag.size % 2 != 0 {
        violations.push(Violation::BadSize {
          block: offset,
          size: tag.size,
        });
      }

      let header = read_word(heap, offset);
      let footer = read_word(heap, block.footer(heap));
      if header != footer {
        violations.push(Violation::HeaderFooterMismatch {
          block: offset,
          header,
          footer,
        });
      }

      if tag.allocated {
        prev_free = None;
      } else {
        if let Some(prev) = prev_free {
          violations.push(Violation::AdjacentFree {
            first: prev.offset(),
            second: offset,
          });
        }
        if !self.links_consistent(heap, block, tag.size) {
          violations.push(Violation::BrokenLink(offset));
        }
        free.insert(block);
        prev_free = Some(block);
      }

      block = block.next(heap);
    }

    free
  }

  /// A free block's predecessor must point back at it (or, lacking one, it
  /// must head its class), and its successor must name it as predecessor.
  fn links_consistent(
    &self,
    heap: &[u8],
    block: Block,
    size: usize,
  ) -> bool {
    let linkable = |link: Block| link.offset() + 3 * WSIZE <= heap.len();

    let pred_ok = match block.pred(heap) {
      None => self.free_lists.head(class_of(size)) == Some(block),
      Some(pred) => linkable(pred) && pred.succ(heap) == Some(block),
    };
    let succ_ok = match block.succ(heap) {
      None => true,
      Some(succ) => linkable(succ) && succ.pred(heap) == Some(block),
    };

    pred_ok && succ_ok
  }

  /// List pass: class bounds, membership, and coverage of the free set.
  fn walk_lists(
    &self,
    heap: &[u8],
    free: &BTreeSet<Block>,
    violations: &mut Vec<Violation>,
  ) {
    let mut listed = BTreeSet::new();

    for class in 0..CLASS_COUNT {
      let (lower, upper) = class_bounds(class);
      let mut cursor = self.free_lists.head(class);

      while let Some(block) = cursor {
        if !free.contains(&block) {
          violations.push(Violation::StaleListEntry {
            block: block.offset(),
            class,
          });
          break;
        }
        if !listed.insert(block) {
          violations.push(Violation::ListedTwice(block.offset()));
          break;
        }

        let size = block.size(heap);
        if size < lower || upper.is_some_and(|upper| size >= upper) {
          violations.push(Violation::WrongClass {
            block: block.offset(),
            size,
            class,
          });
        }

        cursor = block.succ(heap);
      }
    }

    for block in free.difference(&listed) {
      violations.push(Violation::NotListed(block.offset()));
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::block::write_word;

  #[test]
  fn test_clean_heap_has_no_violations() {
    let mut allocator = SegAllocator::new().unwrap();
    let a = allocator.allocate(24);
    let _b = allocator.allocate(300);
    let c = allocator.allocate(8);
    allocator.release(a).unwrap();
    allocator.release(c).unwrap();

    assert_eq!(allocator.check_heap(), Vec::<Violation>::new());
  }

  #[test]
  fn test_detects_footer_corruption() {
    let mut allocator = SegAllocator::new().unwrap();
    let _a = allocator.allocate(24);

    // First block is at 12 and spans 8 words.
    let heap = allocator.provider.bytes_mut();
    write_word(heap, 12 + 7 * WSIZE, Tag::used(10).encode());

    let violations = allocator.check_heap();
    assert!(violations.contains(&Violation::HeaderFooterMismatch {
      block: 12,
      header: Tag::used(8).encode(),
      footer: Tag::used(10).encode(),
    }));
  }

  #[test]
  fn test_detects_adjacent_free_blocks() {
    let mut allocator = SegAllocator::new().unwrap();
    let a = allocator.allocate(24);

    // Flip the allocated block to free behind the allocator's back; it now
    // touches the free remainder and is on no list.
    let block = Block::from_payload(a.addr() - allocator.provider.base().addr());
    let heap = allocator.provider.bytes_mut();
    let size = block.size(heap);
    block.write(heap, Tag::free(size));

    let violations = allocator.check_heap();
    assert!(violations.contains(&Violation::AdjacentFree {
      first: block.offset(),
      second: block.offset() + size * WSIZE,
    }));
    assert!(violations.contains(&Violation::NotListed(block.offset())));
  }

  #[test]
  fn test_detects_stale_list_entry() {
    let mut allocator = SegAllocator::new().unwrap();
    let _a = allocator.allocate(24);

    // The remainder stays listed but is marked allocated.
    let rest = Block::from_offset(12 + 8 * WSIZE);
    let heap = allocator.provider.bytes_mut();
    let size = rest.size(heap);
    rest.write(heap, Tag::used(size));

    let violations = allocator.check_heap();
    assert!(violations.contains(&Violation::StaleListEntry {
      block: rest.offset(),
      class: class_of(size),
    }));
  }

  #[test]
  fn test_detects_wrong_class_and_broken_links() {
    let mut allocator = SegAllocator::new().unwrap();
    let a = allocator.allocate(24);
    let _b = allocator.allocate(24);
    allocator.release(a).unwrap();

    // Grow the freed 8-word block's tags in place: header and footer stay
    // equal, but it no longer belongs to class 2.
    let block = Block::from_offset(12);
    let heap = allocator.provider.bytes_mut();
    write_word(heap, 12, Tag::free(16).encode());
    write_word(heap, 12 + 15 * WSIZE, Tag::free(16).encode());
    block.set_succ(heap, Some(Block::from_offset(44)));

    let violations = allocator.check_heap();
    assert!(violations.contains(&Violation::WrongClass {
      block: 12,
      size: 16,
      class: 2,
    }));
    assert!(violations.contains(&Violation::BrokenLink(12)));
  }

  #[test]
  fn test_detects_bad_epilogue() {
    let mut allocator = SegAllocator::new().unwrap();
    let end = allocator.heap_size() - WSIZE;

    write_word(allocator.provider.bytes_mut(), end, Tag::free(0).encode());

    assert!(allocator.check_heap().contains(&Violation::BadEpilogue(end)));
  }

  #[test]
  fn test_detects_bad_prologue() {
    let mut allocator = SegAllocator::new().unwrap();

    write_word(allocator.provider.bytes_mut(), 4, Tag::used(4).encode());

    assert!(allocator.check_heap().contains(&Violation::BadPrologue(4)));
  }

  #[test]
  fn test_detects_neighbour_outside_heap() {
    let mut allocator = SegAllocator::new().unwrap();

    // The prologue footer now claims a size reaching below the heap start.
    write_word(allocator.provider.bytes_mut(), 8, Tag::used(6).encode());

    let violations = allocator.check_heap();
    assert!(violations.contains(&Violation::NeighbourOutOfBounds(12)));
    assert!(violations.contains(&Violation::BadPrologue(4)));
  }

  #[test]
  fn test_detects_undersized_block() {
    let mut allocator = SegAllocator::new().unwrap();

    // Carve the 64-word chunk into a 2-word block and a 62-word block.
    let heap = allocator.provider.bytes_mut();
    Block::from_offset(12).write(heap, Tag::used(2));
    Block::from_offset(20).write(heap, Tag::used(62));

    let violations = allocator.check_heap();
    assert!(violations.contains(&Violation::BadSize { block: 12, size: 2 }));
    assert!(!violations.contains(&Violation::BadSize { block: 20, size: 62 }));
  }

  #[test]
  fn test_detects_misaligned_block() {
    let mut allocator = SegAllocator::new().unwrap();

    // An odd-sized block pushes its successor's payload off the double word.
    let heap = allocator.provider.bytes_mut();
    Block::from_offset(12).write(heap, Tag::used(5));
    Block::from_offset(32).write(heap, Tag::used(59));

    let violations = allocator.check_heap();
    assert!(violations.contains(&Violation::Misaligned(32)));
    assert!(!violations.contains(&Violation::Misaligned(12)));
    assert!(violations.contains(&Violation::BadSize { block: 12, size: 5 }));
  }

  #[test]
  fn test_detects_free_list_cycle() {
    let mut allocator = SegAllocator::new().unwrap();

    let block = Block::from_offset(12);
    block.set_succ(allocator.provider.bytes_mut(), Some(block));

    let violations = allocator.check_heap();
    assert!(violations.contains(&Violation::ListedTwice(12)));
    assert!(violations.contains(&Violation::BrokenLink(12)));
  }
}
