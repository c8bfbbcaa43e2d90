//! Arena providers: the contiguous, growable byte region the heap lives in.
//!
//! Every address the heap hands out is a byte offset into the arena, so a
//! provider is free to move its backing storage when it grows.

use std::ops::Range;

use crate::error::ArenaError;

/// A contiguous region that only grows at the top, like a program break.
pub trait Arena {
  /// Extends the region by `increment` bytes and returns the previous top,
  /// which is the offset of the first new byte.
  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<usize, ArenaError>;

  /// Current length of the region in bytes.
  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Valid offsets, `0..len`.
  fn bounds(&self) -> Range<usize> {
    0..self.len()
  }

  fn as_bytes(&self) -> &[u8];

  fn as_bytes_mut(&mut self) -> &mut [u8];
}

/// Arena backed by an owned `Vec<u8>` with a hard size limit.
#[derive(Debug)]
pub struct VecArena {
  data: Vec<u8>,
  limit: usize,
}

impl VecArena {
  pub fn new(limit: usize) -> Self {
    Self {
      data: Vec::new(),
      limit,
    }
  }

  pub fn limit(&self) -> usize {
    self.limit
  }
}

impl Arena for VecArena {
  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<usize, ArenaError> {
    let top = self.data.len();
    let available = self.limit - top;
    let exhausted = ArenaError::Exhausted {
      requested: increment,
      available,
    };

    if increment > available {
      return Err(exhausted);
    }
    if self.data.try_reserve_exact(increment).is_err() {
      return Err(exhausted);
    }

    self.data.resize(top + increment, 0);
    Ok(top)
  }

  fn len(&self) -> usize {
    self.data.len()
  }

  fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  fn as_bytes_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}
