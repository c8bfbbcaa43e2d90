use std::io;

use thiserror::Error;

/// Failures reported by an [`Arena`](crate::arena::Arena) provider.
#[derive(Debug, Error)]
pub enum ArenaError {
  #[error("arena exhausted: requested {requested} bytes, {available} available")]
  Exhausted { requested: usize, available: usize },

  #[error("failed to map arena memory: {0}")]
  Map(#[source] io::Error),
}

/// Invalid [`HeapConfig`](crate::config::HeapConfig) values.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
  #[error("chunk size {chunk_size} is below the minimum block size {min}")]
  ChunkTooSmall { chunk_size: usize, min: usize },

  #[error("fit window must examine at least one candidate")]
  EmptyFitWindow,

  #[error("heap limit {max_heap} cannot hold the sentinels and one {chunk_size}-byte chunk")]
  HeapTooSmall { max_heap: usize, chunk_size: usize },
}

/// Errors surfaced by the `try_*` heap operations.
#[derive(Debug, Error)]
pub enum HeapError {
  #[error("zero-sized allocation")]
  ZeroSize,

  #[error("element count {count} times size {size} overflows")]
  Overflow { count: usize, size: usize },

  #[error("request of {size} bytes cannot be represented as a block")]
  TooLarge { size: usize },

  #[error(transparent)]
  Arena(#[from] ArenaError),

  #[error(transparent)]
  Config(#[from] ConfigError),
}
