//! Boundary-tag coalescing.
//!
//! ```text
//!   case 1:  [ alloc ][ bp ][ alloc ]   ->  [ alloc ][  bp  ][ alloc ]
//!   case 2:  [ alloc ][ bp ][ free  ]   ->  [ alloc ][ bp + next ]
//!   case 3:  [ free  ][ bp ][ alloc ]   ->  [ prev + bp ][ alloc ]
//!   case 4:  [ free  ][ bp ][ free  ]   ->  [ prev + bp + next ]
//! ```
//!
//! A free neighbour is unlinked from its bucket before the merged size is
//! written, and the merged block is pushed onto the bucket for its new size
//! only after that.

use tracing::trace;

use crate::{
  Heap,
  arena::Arena,
  block::{Tag, header, next_block, prev_block, prev_tag, write_block},
  class::bucket,
};

impl<A: Arena> Heap<A> {
  /// Merges the free block at `bp` with its free physical neighbours and
  /// inserts the result at the head of its bucket. Returns the payload
  /// offset of the merged block.
  pub(crate) fn coalesce(
    &mut self,
    bp: usize,
  ) -> usize {
    let mem = self.arena.as_bytes();
    let size = header(mem, bp).size();
    let prev = (!prev_tag(mem, bp).is_allocated()).then(|| prev_block(mem, bp));
    let next = next_block(mem, bp);
    let next = (!header(mem, next).is_allocated()).then_some(next);

    let (start, merged) = match (prev, next) {
      (None, None) => (bp, size),
      (None, Some(next)) => (bp, size + self.unlink(next)),
      (Some(prev), None) => (prev, size + self.unlink(prev)),
      (Some(prev), Some(next)) => {
        let next_size = self.unlink(next);
        let prev_size = self.unlink(prev);
        (prev, prev_size + size + next_size)
      }
    };

    trace!(
      bp,
      start,
      size,
      merged,
      prev_free = prev.is_some(),
      next_free = next.is_some(),
      "coalesce"
    );

    let class = bucket(merged);
    let mem = self.arena.as_bytes_mut();
    write_block(mem, start, Tag::new(merged, false));
    self.lists.insert_head(mem, class, start);
    start
  }

  /// Removes the free block at `bp` from its bucket and returns its size.
  pub(crate) fn unlink(
    &mut self,
    bp: usize,
  ) -> usize {
    let mem = self.arena.as_bytes_mut();
    let size = header(mem, bp).size();
    self.lists.remove(mem, bucket(size), bp);
    size
  }
}
