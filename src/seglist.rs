//! Segregated free lists.
//!
//! One LIFO, doubly linked list per size class. Classes split sizes (in
//! words) at powers of two from 4 up to 4096; the last class is unbounded.

use crate::block::Block;

pub const CLASS_COUNT: usize = 12;

const CLASS_LIMITS: [usize; CLASS_COUNT - 1] = [4, 8, 16, 32, 64, 128, 256, 512, 1024, 2048, 4096];

/// Index of the size class holding blocks of `size` words.
pub fn class_of(size: usize) -> usize {
  CLASS_LIMITS.partition_point(|&limit| limit <= size)
}

/// `[lower, upper)` word range of a class; `None` means unbounded.
pub fn class_bounds(class: usize) -> (usize, Option<usize>) {
  let lower = match class {
    0 => 0,
    class => CLASS_LIMITS[class - 1],
  };
  (lower, CLASS_LIMITS.get(class).copied())
}

/// Heads of every class list. The links themselves live inside the free
/// blocks, so every operation borrows the heap bytes.
#[derive(Debug, Clone, Default)]
pub struct SegList {
  heads: [Option<Block>; CLASS_COUNT],
}

impl SegList {
  pub const fn new() -> Self {
    Self {
      heads: [None; CLASS_COUNT],
    }
  }

  pub fn head(
    &self,
    class: usize,
  ) -> Option<Block> {
    self.heads[class]
  }

  /// Pushes `block` to the front of its class list.
  pub fn insert(
    &mut self,
    heap: &mut [u8],
    block: Block,
  ) {
    let class = class_of(block.size(heap));
    let head = self.heads[class];

    block.set_pred(heap, None);
    block.set_succ(heap, head);

    if let Some(head) = head {
      head.set_pred(heap, Some(block));
    }

    self.heads[class] = Some(block);
  }

  /// Unlinks `block` from wherever it sits in its class list. The block's
  /// size must still be the one it was inserted with.
  pub fn remove(
    &mut self,
    heap: &mut [u8],
    block: Block,
  ) {
    let pred = block.pred(heap);
    let succ = block.succ(heap);

    match pred {
      None => {
        let class = class_of(block.size(heap));
        debug_assert_eq!(self.heads[class], Some(block), "unlinked block is not a list head");

        self.heads[class] = succ;
        if let Some(succ) = succ {
          succ.set_pred(heap, None);
        }
      }
      Some(pred) => {
        pred.set_succ(heap, succ);
        if let Some(succ) = succ {
          succ.set_pred(heap, Some(pred));
        }
      }
    }
  }

  /// First fit, starting at the class of `size` and escalating to larger
  /// classes only.
  pub fn find_fit(
    &self,
    heap: &[u8],
    size: usize,
  ) -> Option<Block> {
    (class_of(size)..CLASS_COUNT)
      .flat_map(|class| self.iter(heap, class))
      .find(|block| block.size(heap) >= size)
  }

  pub fn iter<'a>(
    &self,
    heap: &'a [u8],
    class: usize,
  ) -> ListIter<'a> {
    ListIter {
      heap,
      cursor: self.heads[class],
    }
  }
}

/// Walks one class list from its head.
pub struct ListIter<'a> {
  heap: &'a [u8],
  cursor: Option<Block>,
}

impl Iterator for ListIter<'_> {
  type Item = Block;

  fn next(&mut self) -> Option<Block> {
    let block = self.cursor?;
    self.cursor = block.succ(self.heap);
    Some(block)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::block::Tag;

  fn heap_with_free_blocks(sizes: &[usize]) -> (Vec<u8>, Vec<Block>) {
    let total: usize = sizes.iter().sum::<usize>() * 4 + 16;
    let mut heap = vec![0u8; total];
    let mut blocks = Vec::new();
    let mut offset = 12;

    for &size in sizes {
      let block = Block::from_offset(offset);
      block.write(&mut heap, Tag::free(size));
      blocks.push(block);
      offset += size * 4;
    }

    (heap, blocks)
  }

  fn members(
    list: &SegList,
    heap: &[u8],
    class: usize,
  ) -> Vec<Block> {
    list.iter(heap, class).collect()
  }

  #[test]
  fn test_class_of_boundaries() {
    assert_eq!(class_of(0), 0);
    assert_eq!(class_of(3), 0);
    assert_eq!(class_of(4), 1);
    assert_eq!(class_of(7), 1);
    assert_eq!(class_of(8), 2);
    assert_eq!(class_of(63), 4);
    assert_eq!(class_of(64), 5);
    assert_eq!(class_of(4095), 10);
    assert_eq!(class_of(4096), 11);
    assert_eq!(class_of(1 << 29), 11);
  }

  #[test]
  fn test_class_bounds_cover_class_of() {
    for size in 0..10_000 {
      let (lower, upper) = class_bounds(class_of(size));
      assert!(size >= lower);
      assert!(upper.is_none_or(|upper| size < upper));
    }
  }

  #[test]
  fn test_insert_is_lifo() {
    let (mut heap, blocks) = heap_with_free_blocks(&[4, 6, 4]);
    let mut list = SegList::new();

    for &block in &blocks {
      list.insert(&mut heap, block);
    }

    assert_eq!(members(&list, &heap, 1), vec![blocks[2], blocks[1], blocks[0]]);
    assert_eq!(blocks[2].pred(&heap), None);
    assert_eq!(blocks[1].pred(&heap), Some(blocks[2]));
    assert_eq!(blocks[0].succ(&heap), None);
  }

  #[test]
  fn test_remove_head_middle_and_tail() {
    let (mut heap, blocks) = heap_with_free_blocks(&[4, 4, 4, 4]);
    let mut list = SegList::new();
    for &block in &blocks {
      list.insert(&mut heap, block);
    }

    list.remove(&mut heap, blocks[2]);
    assert_eq!(members(&list, &heap, 1), vec![blocks[3], blocks[1], blocks[0]]);
    assert_eq!(blocks[1].pred(&heap), Some(blocks[3]));

    list.remove(&mut heap, blocks[3]);
    assert_eq!(list.head(1), Some(blocks[1]));
    assert_eq!(blocks[1].pred(&heap), None);

    list.remove(&mut heap, blocks[0]);
    assert_eq!(members(&list, &heap, 1), vec![blocks[1]]);
    assert_eq!(blocks[1].succ(&heap), None);

    list.remove(&mut heap, blocks[1]);
    assert_eq!(list.head(1), None);
  }

  #[test]
  fn test_find_fit_escalates_to_larger_classes() {
    let (mut heap, blocks) = heap_with_free_blocks(&[10, 12, 40]);
    let mut list = SegList::new();
    for &block in &blocks {
      list.insert(&mut heap, block);
    }

    // 10 and 12 share class 2; first fit walks it head first.
    assert_eq!(list.find_fit(&heap, 10), Some(blocks[1]));
    assert_eq!(list.find_fit(&heap, 11), Some(blocks[1]));
    assert_eq!(list.find_fit(&heap, 14), Some(blocks[2]));
    assert_eq!(list.find_fit(&heap, 4), Some(blocks[1]));
    assert_eq!(list.find_fit(&heap, 41), None);
  }
}
