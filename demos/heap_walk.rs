use std::ptr;

use segalloc::{SegAllocator, class_of};

/// Prints every block between the prologue and the epilogue, plus the free
/// list occupancy per size class.
fn print_heap(
  label: &str,
  allocator: &SegAllocator,
) {
  let stats = allocator.stats();
  println!(
    "\n[{label}] heap = {} bytes, {} allocated / {} free blocks",
    stats.heap_bytes, stats.allocated_blocks, stats.free_blocks
  );

  for block in allocator.blocks() {
    let state = if block.allocated { "alloc" } else { "free " };
    println!(
      "  {:#06x}  {state}  {:>6} bytes  (class {})",
      block.offset,
      block.size,
      class_of(block.size / segalloc::WSIZE)
    );
  }

  println!("  free lists per class: {:?}", stats.class_counts);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  env_logger::init();

  let mut allocator = SegAllocator::new()?;
  print_heap("init", &allocator);

  // --------------------------------------------------------------------
  // 1) A few small requests carve the first chunk from the front.
  // --------------------------------------------------------------------
  let first = allocator.allocate(8);
  let second = allocator.allocate(16);
  let third = allocator.allocate(32);
  let fourth = allocator.allocate(64);
  unsafe { ptr::write_bytes(second, 0xAB, 16) };
  print_heap("after four allocations", &allocator);

  // --------------------------------------------------------------------
  // 2) Releasing two neighbours merges them into one free block.
  // --------------------------------------------------------------------
  allocator.release(second)?;
  allocator.release(third)?;
  print_heap("after releasing the middle pair", &allocator);

  // --------------------------------------------------------------------
  // 3) A request that fits the merged span reuses it.
  // --------------------------------------------------------------------
  let reused = allocator.allocate(56);
  println!("\n[3] reused == second? {}", reused == second);

  // --------------------------------------------------------------------
  // 4) Growing past the current chunk extends the heap.
  // --------------------------------------------------------------------
  let grown = allocator.reallocate(fourth, 4096)?;
  print_heap("after growing the fourth block", &allocator);

  // --------------------------------------------------------------------
  // 5) Zeroed allocations are always cleared.
  // --------------------------------------------------------------------
  let zeroed = allocator.allocate_zeroed(10, 4);
  let all_zero = unsafe { std::slice::from_raw_parts(zeroed, 40) }.iter().all(|&b| b == 0);
  println!("\n[5] zeroed region clean? {all_zero}");

  for ptr in [first, reused, grown, zeroed] {
    allocator.release(ptr)?;
  }
  print_heap("after releasing everything", &allocator);

  let violations = allocator.check_heap();
  println!("\nheap check: {} violation(s)", violations.len());

  Ok(())
}
