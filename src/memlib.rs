use std::{ptr, ptr::NonNull, slice};

use libc::{MAP_ANONYMOUS, MAP_FAILED, MAP_NORESERVE, MAP_PRIVATE, PROT_READ, PROT_WRITE, c_void};
use log::debug;

use crate::{HeapError, Result, WSIZE, align};

/// Backing store for a [`SegAllocator`](crate::SegAllocator).
///
/// The region is contiguous, grows monotonically from its base and never
/// moves, so offsets handed out stay valid for the provider's lifetime.
pub trait HeapProvider {
  /// Grows the region by `incr` bytes (rounded up to the word size) and
  /// returns the offset of the previous break.
  fn extend(
    &mut self,
    incr: usize,
  ) -> Result<usize>;

  /// Lowest address of the region.
  fn base(&self) -> *mut u8;

  /// The bytes between the base and the current break.
  fn bytes(&self) -> &[u8];

  fn bytes_mut(&mut self) -> &mut [u8];

  fn len(&self) -> usize {
    self.bytes().len()
  }

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Current `[low, high)` address span.
  fn bounds(&self) -> (usize, usize) {
    let low = self.base().addr();
    (low, low + self.len())
  }
}

/// An `sbrk`-style heap carved out of one up-front `mmap` reservation.
///
/// ```text
///   start                 start + brk             start + capacity
///   ├───────────────────────┼───────────────────────────┤
///   │   handed out (heap)   │   reserved, untouched     │
///   └───────────────────────┴───────────────────────────┘
/// ```
///
/// The reservation uses `MAP_NORESERVE`, so pages are only committed once
/// the allocator writes to them. The whole mapping goes back to the OS on
/// drop.
pub struct MemLib {
  start: NonNull<u8>,
  brk: usize,
  capacity: usize,
}

// SAFETY: `MemLib` exclusively owns its mapping.
unsafe impl Send for MemLib {}

impl MemLib {
  pub fn new(capacity: usize) -> Result<Self> {
    if capacity == 0 {
      return Err(HeapError::InvalidConfig("heap reservation must be non-empty"));
    }

    // SAFETY: anonymous private mapping, no existing memory is touched.
    let addr = unsafe {
      libc::mmap(
        ptr::null_mut(),
        capacity,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANONYMOUS | MAP_NORESERVE,
        -1,
        0,
      )
    };

    if addr == MAP_FAILED {
      return Err(HeapError::OutOfMemory { requested: capacity });
    }

    let start = NonNull::new(addr.cast::<u8>()).ok_or(HeapError::OutOfMemory { requested: capacity })?;
    debug!("reserved {capacity} bytes for the heap at {:p}", start);

    Ok(Self {
      start,
      brk: 0,
      capacity,
    })
  }
}

impl HeapProvider for MemLib {
  fn extend(
    &mut self,
    incr: usize,
  ) -> Result<usize> {
    if incr > usize::MAX - WSIZE {
      return Err(HeapError::OutOfMemory { requested: incr });
    }
    let incr = align!(incr, WSIZE);

    let old_brk = self.brk;
    match old_brk.checked_add(incr) {
      Some(new_brk) if new_brk <= self.capacity => {
        self.brk = new_brk;
        Ok(old_brk)
      }
      _ => {
        debug!(
          "heap exhausted: break {old_brk} + {incr} exceeds {} reserved bytes",
          self.capacity
        );
        Err(HeapError::OutOfMemory { requested: incr })
      }
    }
  }

  fn base(&self) -> *mut u8 {
    self.start.as_ptr()
  }

  fn bytes(&self) -> &[u8] {
    // SAFETY: `[start, start + brk)` lies inside the live mapping.
    unsafe { slice::from_raw_parts(self.start.as_ptr(), self.brk) }
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    // SAFETY: as above; `&mut self` keeps the slice unique within the provider.
    unsafe { slice::from_raw_parts_mut(self.start.as_ptr(), self.brk) }
  }
}

impl Drop for MemLib {
  fn drop(&mut self) {
    // SAFETY: unmaps exactly the region mapped in `new`.
    let rc = unsafe { libc::munmap(self.start.as_ptr().cast::<c_void>(), self.capacity) };
    debug_assert_eq!(rc, 0, "munmap of the heap reservation failed");
  }
}
