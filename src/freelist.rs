//! Segregated, intrusive, doubly linked free lists.
//!
//! The links live inside the payload of each free block: `next` at `bp`,
//! `prev` at `bp + WORD`. A link value of [`NIL`] means "no block"; offset
//! zero can never be a payload because the padding word and the prologue
//! sit in front of every block.
//!
//! Removal is always O(1): the caller reads the block's own `prev`/`next`
//! and hands them to [`FreeLists::splice`]. Nothing here ever scans a list
//! to find a node.

use crate::{
  block::{WORD, read_word, write_word},
  class::CLASS_COUNT,
};

pub(crate) const NIL: usize = 0;

fn link(raw: u64) -> Option<usize> {
  match raw as usize {
    NIL => None,
    offset => Some(offset),
  }
}

fn raw_link(offset: Option<usize>) -> u64 {
  offset.unwrap_or(NIL) as u64
}

pub(crate) fn next_free(
  mem: &[u8],
  bp: usize,
) -> Option<usize> {
  link(read_word(mem, bp))
}

pub(crate) fn prev_free(
  mem: &[u8],
  bp: usize,
) -> Option<usize> {
  link(read_word(mem, bp + WORD))
}

fn set_next(
  mem: &mut [u8],
  bp: usize,
  next: Option<usize>,
) {
  write_word(mem, bp, raw_link(next));
}

fn set_prev(
  mem: &mut [u8],
  bp: usize,
  prev: Option<usize>,
) {
  write_word(mem, bp + WORD, raw_link(prev));
}

/// Heads of the per-class free lists.
#[derive(Clone, Debug, Default)]
pub(crate) struct FreeLists {
  heads: [Option<usize>; CLASS_COUNT],
}

impl FreeLists {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn head(
    &self,
    class: usize,
  ) -> Option<usize> {
    self.heads[class]
  }

  /// Pushes `bp` at the front of `class`.
  pub fn insert_head(
    &mut self,
    mem: &mut [u8],
    class: usize,
    bp: usize,
  ) {
    let old_head = self.heads[class];
    set_next(mem, bp, old_head);
    set_prev(mem, bp, None);
    if let Some(old_head) = old_head {
      set_prev(mem, old_head, Some(bp));
    }
    self.heads[class] = Some(bp);
  }

  /// Links `prev` and `next` directly, dropping whatever sat between them.
  /// A missing `prev` means `next` becomes the head of `class`.
  pub fn splice(
    &mut self,
    mem: &mut [u8],
    class: usize,
    prev: Option<usize>,
    next: Option<usize>,
  ) {
    match prev {
      Some(prev) => set_next(mem, prev, next),
      None => self.heads[class] = next,
    }
    if let Some(next) = next {
      set_prev(mem, next, prev);
    }
  }

  /// Unlinks `bp` from `class` using its own links.
  pub fn remove(
    &mut self,
    mem: &mut [u8],
    class: usize,
    bp: usize,
  ) {
    let prev = prev_free(mem, bp);
    let next = next_free(mem, bp);
    self.splice(mem, class, prev, next);
  }
}
