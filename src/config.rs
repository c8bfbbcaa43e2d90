//! Heap tuning knobs.

use crate::{
  align,
  align::checked_align,
  block::{MIN_BLOCK_SIZE, PROLOGUE_SIZE, WORD},
  error::ConfigError,
};

/// Bytes taken by the padding word, the prologue and the epilogue header.
pub(crate) const SENTINEL_BYTES: usize = WORD + PROLOGUE_SIZE + WORD;

/// Configuration for a [`Heap`](crate::Heap).
///
/// Validated when the heap is constructed; immutable afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeapConfig {
  /// Minimum number of bytes requested from the arena when no free block
  /// fits. Rounded up to the alignment quantum.
  pub chunk_size: usize,

  /// How many sufficient candidates the fit search examines per bucket
  /// before settling on the smallest one seen.
  pub fit_window: usize,

  /// Upper bound on the arena size, in bytes. Used by the built-in arena
  /// providers.
  pub max_heap: usize,
}

impl HeapConfig {
  /// 260 bytes rounded up to an even number of 4-byte words.
  pub const DEFAULT_CHUNK_SIZE: usize = 264;

  pub const DEFAULT_FIT_WINDOW: usize = 10;

  /// 20 MiB.
  pub const DEFAULT_MAX_HEAP: usize = 20 * (1 << 20);

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.chunk_size < MIN_BLOCK_SIZE {
      return Err(ConfigError::ChunkTooSmall {
        chunk_size: self.chunk_size,
        min: MIN_BLOCK_SIZE,
      });
    }

    if self.fit_window == 0 {
      return Err(ConfigError::EmptyFitWindow);
    }

    let needed = checked_align(self.chunk_size).and_then(|chunk| chunk.checked_add(SENTINEL_BYTES));
    if needed.is_none_or(|needed| self.max_heap < needed) {
      return Err(ConfigError::HeapTooSmall {
        max_heap: self.max_heap,
        chunk_size: self.chunk_size,
      });
    }

    Ok(())
  }

  /// Chunk size rounded up to the alignment quantum.
  pub(crate) fn aligned_chunk(&self) -> usize {
    align!(self.chunk_size)
  }
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      chunk_size: Self::DEFAULT_CHUNK_SIZE,
      fit_window: Self::DEFAULT_FIT_WINDOW,
      max_heap: Self::DEFAULT_MAX_HEAP,
    }
  }
}
