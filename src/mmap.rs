use std::{io, ptr, slice};

use libc::{MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE, c_void};

use crate::{arena::Arena, error::ArenaError};

/// Arena that reserves its whole limit up front with `mmap(2)` and moves a
/// break inside the mapping, so the bytes never relocate.
///
/// ```text
///   base                    brk                        base + limit
///   │                       │                          │
///   ▼                       ▼                          ▼
///   ┌───────────────────────┬──────────────────────────┐
///   │   arena (0..brk)      │   reserved, untouched    │
///   └───────────────────────┴──────────────────────────┘
/// ```
///
/// Pages past the break are never touched, so the kernel only commits what
/// the heap actually uses.
pub struct MmapArena {
  base: *mut u8,
  brk: usize,
  limit: usize,
}

impl MmapArena {
  pub fn new(limit: usize) -> Result<Self, ArenaError> {
    // SAFETY: a fresh anonymous private mapping with a null hint aliases
    // no existing memory; failure is reported as `MAP_FAILED`.
    let address = unsafe {
      libc::mmap(
        ptr::null_mut(),
        limit,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANONYMOUS,
        -1,
        0,
      )
    };

    if address == MAP_FAILED {
      return Err(ArenaError::Map(io::Error::last_os_error()));
    }

    Ok(Self {
      base: address as *mut u8,
      brk: 0,
      limit,
    })
  }

  pub fn limit(&self) -> usize {
    self.limit
  }
}

impl Arena for MmapArena {
  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<usize, ArenaError> {
    let available = self.limit - self.brk;
    if increment > available {
      return Err(ArenaError::Exhausted {
        requested: increment,
        available,
      });
    }

    let old_brk = self.brk;
    self.brk += increment;
    Ok(old_brk)
  }

  fn len(&self) -> usize {
    self.brk
  }

  fn as_bytes(&self) -> &[u8] {
    // SAFETY: `base..base + brk` lies inside a live read/write mapping that
    // only `self` can reach.
    unsafe { slice::from_raw_parts(self.base, self.brk) }
  }

  fn as_bytes_mut(&mut self) -> &mut [u8] {
    // SAFETY: see `as_bytes`; `&mut self` guarantees exclusive access.
    unsafe { slice::from_raw_parts_mut(self.base, self.brk) }
  }
}

impl Drop for MmapArena {
  fn drop(&mut self) {
    // SAFETY: `base..base + limit` is the mapping created in `new`, and no
    // slice borrowed from it can outlive `self`.
    unsafe {
      libc::munmap(self.base as *mut c_void, self.limit);
    }
  }
}
