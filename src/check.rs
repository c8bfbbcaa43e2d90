//! Heap consistency checker.
//!
//! Two passes: a physical walk from the prologue to the epilogue, then a
//! walk over every bucket. The free-block counts of both passes must agree.
//! The checker only reports; it never repairs anything, and it is written
//! to survive an arena whose tags or links are garbage.

use std::ops::Range;

use thiserror::Error;
use tracing::{debug, error};

use crate::{
  Heap,
  align::is_aligned,
  arena::Arena,
  block::{MIN_BLOCK_SIZE, OVERHEAD, PROLOGUE_SIZE, Tag, WORD, try_read_word},
  class::{CLASS_COUNT, bucket},
};

/// A broken heap invariant.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Violation {
  #[error("bad prologue block at {offset:#x}")]
  BadPrologue { offset: usize },

  #[error("bad epilogue header at {offset:#x}")]
  BadEpilogue { offset: usize },

  #[error("block {offset:#x} is not aligned")]
  Misaligned { offset: usize },

  #[error("block {offset:#x} is not in the arena")]
  OutOfBounds { offset: usize },

  #[error("block {offset:#x}: header {header:?} does not match footer {footer:?}")]
  TagMismatch { offset: usize, header: Tag, footer: Tag },

  #[error("block {offset:#x} of {size} bytes is below the minimum block size")]
  Undersized { offset: usize, size: usize },

  #[error("free blocks {offset:#x} and {next:#x} are not coalesced")]
  Uncoalesced { offset: usize, next: usize },

  #[error("bucket {class} has a cycle")]
  Cycle { class: usize },

  #[error("bucket {class} links to {offset:#x}, outside the arena")]
  DanglingLink { class: usize, offset: usize },

  #[error("block {offset:#x} in bucket {class} is not free")]
  AllocatedInList { class: usize, offset: usize },

  #[error("block {offset:#x} of {size} bytes is in bucket {class}, expected bucket {expected}")]
  WrongBucket {
    offset: usize,
    size: usize,
    class: usize,
    expected: usize,
  },

  #[error("next/prev links of {offset:#x} are not consistent")]
  BrokenLinks { offset: usize },

  #[error("{arena} free blocks in the arena but {lists} in the buckets")]
  FreeCountMismatch { arena: usize, lists: usize },
}

/// Outcome of [`Heap::check`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeapReport {
  pub violations: Vec<Violation>,
  /// Blocks between the sentinels.
  pub blocks: usize,
  /// Free blocks found by the physical walk.
  pub arena_free: usize,
  /// Free blocks found by walking the buckets.
  pub list_free: usize,
}

impl HeapReport {
  pub fn is_consistent(&self) -> bool {
    self.violations.is_empty()
  }

  fn push(
    &mut self,
    violation: Violation,
  ) {
    error!(%violation, "heap check");
    self.violations.push(violation);
  }
}

fn tag_at(
  mem: &[u8],
  at: usize,
) -> Option<Tag> {
  try_read_word(mem, at).map(Tag::from_raw)
}

fn link_at(
  mem: &[u8],
  at: usize,
) -> Option<usize> {
  try_read_word(mem, at).and_then(|raw| match raw as usize {
    0 => None,
    offset => Some(offset),
  })
}

/// Tortoise and hare over the `next` links of one bucket.
fn has_cycle(
  mem: &[u8],
  head: Option<usize>,
) -> bool {
  let mut tortoise = head;
  let mut hare = head;

  while let (Some(slow), Some(fast)) = (tortoise, hare) {
    tortoise = link_at(mem, slow);
    hare = match link_at(mem, fast) {
      Some(step) => link_at(mem, step),
      None => return false,
    };

    if tortoise.is_some() && tortoise == hare {
      return true;
    }
  }

  false
}

fn print_block(
  mem: &[u8],
  bp: usize,
) {
  let Some(header) = tag_at(mem, bp - WORD) else {
    println!("{bp:#x}: <unreadable>");
    return;
  };

  if header.size() == 0 {
    println!("{bp:#x}: EOL");
    return;
  }

  let footer = bp
    .checked_add(header.size())
    .and_then(|end| tag_at(mem, end - OVERHEAD));
  match footer {
    Some(footer) => println!("{bp:#x}: header {header:?} footer {footer:?}"),
    None => println!("{bp:#x}: header {header:?} footer <unreadable>"),
  }
}

impl<A: Arena> Heap<A> {
  /// Walks the whole heap and every free list and reports each broken
  /// invariant. With `verbose`, every visited block is printed to stdout.
  pub fn check(
    &self,
    verbose: bool,
  ) -> HeapReport {
    let mem = self.arena.as_bytes();
    let bounds = self.arena.bounds();
    let mut report = HeapReport::default();

    if verbose {
      println!("Heap ({:#x}):", self.prologue);
    }

    match tag_at(mem, self.prologue - WORD) {
      Some(tag) if tag.size() == PROLOGUE_SIZE && tag.is_allocated() => {}
      _ => report.push(Violation::BadPrologue {
        offset: self.prologue,
      }),
    }

    self.check_arena(mem, &bounds, verbose, &mut report);
    self.check_lists(mem, &bounds, verbose, &mut report);

    if report.arena_free != report.list_free {
      report.push(Violation::FreeCountMismatch {
        arena: report.arena_free,
        lists: report.list_free,
      });
    }

    debug!(
      blocks = report.blocks,
      free = report.arena_free,
      violations = report.violations.len(),
      "heap check finished"
    );
    report
  }

  fn check_arena(
    &self,
    mem: &[u8],
    bounds: &Range<usize>,
    verbose: bool,
    report: &mut HeapReport,
  ) {
    let mut bp = self.prologue;
    // Payload offset of the previous block, when it was free.
    let mut prev_free: Option<usize> = None;

    loop {
      if verbose {
        print_block(mem, bp);
      }

      let Some(header) = tag_at(mem, bp - WORD) else {
        report.push(Violation::OutOfBounds { offset: bp });
        return;
      };

      let size = header.size();
      if size == 0 {
        if !header.is_allocated() || bp != bounds.end {
          report.push(Violation::BadEpilogue { offset: bp });
        }
        return;
      }

      if !self.check_block(mem, bounds, bp, header, report) {
        return;
      }

      if bp != self.prologue {
        report.blocks += 1;
      }

      let free = !header.is_allocated();
      if free {
        report.arena_free += 1;
        if let Some(prev) = prev_free {
          report.push(Violation::Uncoalesced {
            offset: prev,
            next: bp,
          });
        }
      }
      prev_free = free.then_some(bp);

      bp += size;
    }
  }

  /// Per-block checks. Returns `false` when the block cannot be walked past.
  fn check_block(
    &self,
    mem: &[u8],
    bounds: &Range<usize>,
    bp: usize,
    header: Tag,
    report: &mut HeapReport,
  ) -> bool {
    let size = header.size();

    if !is_aligned(bp) {
      report.push(Violation::Misaligned { offset: bp });
    }

    let end = (bp - WORD).checked_add(size);
    if !bounds.contains(&(bp - WORD)) || end.is_none_or(|end| end > bounds.end) {
      report.push(Violation::OutOfBounds { offset: bp });
      return false;
    }

    if bp != self.prologue && size < MIN_BLOCK_SIZE {
      report.push(Violation::Undersized { offset: bp, size });
    }

    match tag_at(mem, bp + size - OVERHEAD) {
      Some(footer) if footer == header => {}
      Some(footer) => report.push(Violation::TagMismatch {
        offset: bp,
        header,
        footer,
      }),
      None => {
        report.push(Violation::OutOfBounds { offset: bp });
        return false;
      }
    }

    true
  }

  fn check_lists(
    &self,
    mem: &[u8],
    bounds: &Range<usize>,
    verbose: bool,
    report: &mut HeapReport,
  ) {
    for class in 0..CLASS_COUNT {
      let head = self.lists.head(class);

      if has_cycle(mem, head) {
        report.push(Violation::Cycle { class });
        continue;
      }

      let mut prev = None;
      let mut cursor = head;
      while let Some(bp) = cursor {
        let readable = bp >= WORD && bp.checked_add(2 * WORD).is_some_and(|end| end <= bounds.end);
        let Some(header) = readable.then(|| tag_at(mem, bp - WORD)).flatten() else {
          report.push(Violation::DanglingLink { class, offset: bp });
          break;
        };

        if verbose {
          print_block(mem, bp);
        }
        report.list_free += 1;

        if header.is_allocated() {
          report.push(Violation::AllocatedInList { class, offset: bp });
        }

        let expected = bucket(header.size());
        if expected != class {
          report.push(Violation::WrongBucket {
            offset: bp,
            size: header.size(),
            class,
            expected,
          });
        }

        if link_at(mem, bp + WORD) != prev {
          report.push(Violation::BrokenLinks { offset: bp });
        }

        prev = Some(bp);
        cursor = link_at(mem, bp);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::block::{header, write_block, write_word};

  fn heap_with_holes() -> (Heap, Vec<usize>) {
    let mut heap = Heap::new().unwrap();
    let ptrs: Vec<_> = (0..6).map(|_| heap.allocate(16).unwrap()).collect();
    heap.release(Some(ptrs[1]));
    heap.release(Some(ptrs[3]));
    (heap, ptrs.iter().map(|p| p.offset()).collect())
  }

  #[test]
  fn test_clean_heap_passes() {
    let (heap, _) = heap_with_holes();
    let report = heap.check(false);
    assert!(report.is_consistent(), "{:?}", report.violations);
    assert_eq!(report.blocks, 7);
    assert_eq!(report.arena_free, 3);
    assert_eq!(report.list_free, 3);
  }

  #[test]
  fn test_verbose_check_passes() {
    let (heap, _) = heap_with_holes();
    assert!(heap.check(true).is_consistent());
  }

  #[test]
  fn test_detects_footer_mismatch() {
    let (mut heap, ptrs) = heap_with_holes();
    let mem = heap.arena.as_bytes_mut();
    write_word(mem, ptrs[0] + 32 - OVERHEAD, Tag::new(32, false).raw());

    let report = heap.check(false);
    assert!(report.violations.iter().any(|v| matches!(
      v,
      Violation::TagMismatch { offset, .. } if *offset == ptrs[0]
    )));
  }

  #[test]
  fn test_detects_uncoalesced_neighbours() {
    let (mut heap, ptrs) = heap_with_holes();
    // Flip block 2 to free without going through the coalescer.
    write_block(heap.arena.as_bytes_mut(), ptrs[2], Tag::new(32, false));

    let report = heap.check(false);
    assert!(report.violations.contains(&Violation::Uncoalesced {
      offset: ptrs[1],
      next: ptrs[2],
    }));
    assert!(report.violations.contains(&Violation::FreeCountMismatch {
      arena: 4,
      lists: 3
    }));
  }

  #[test]
  fn test_detects_allocated_block_in_list() {
    let (mut heap, ptrs) = heap_with_holes();
    write_block(heap.arena.as_bytes_mut(), ptrs[3], Tag::new(32, true));

    let report = heap.check(false);
    assert!(report.violations.contains(&Violation::AllocatedInList {
      class: 0,
      offset: ptrs[3]
    }));
  }

  #[test]
  fn test_detects_cycle() {
    let (mut heap, ptrs) = heap_with_holes();
    let head = heap.lists.head(0).unwrap();
    assert_eq!(head, ptrs[3]);
    // Point the second node back at the head.
    write_word(heap.arena.as_bytes_mut(), ptrs[1], head as u64);

    let report = heap.check(false);
    assert!(report.violations.contains(&Violation::Cycle { class: 0 }));
  }

  #[test]
  fn test_detects_broken_prev_link() {
    let (mut heap, ptrs) = heap_with_holes();
    write_word(heap.arena.as_bytes_mut(), ptrs[1] + WORD, 0);

    let report = heap.check(false);
    assert!(report.violations.contains(&Violation::BrokenLinks { offset: ptrs[1] }));
  }

  #[test]
  fn test_detects_wrong_bucket() {
    let (mut heap, ptrs) = heap_with_holes();
    let bp = ptrs[3];
    let size = header(heap.arena.as_bytes(), bp).size();
    heap.unlink(bp);
    heap.lists.insert_head(heap.arena.as_bytes_mut(), 2, bp);

    let report = heap.check(false);
    assert!(report.violations.contains(&Violation::WrongBucket {
      offset: bp,
      size,
      class: 2,
      expected: 0,
    }));
  }

  #[test]
  fn test_detects_dangling_link() {
    let (mut heap, ptrs) = heap_with_holes();
    write_word(heap.arena.as_bytes_mut(), ptrs[1], 1 << 40);

    let report = heap.check(false);
    assert!(report.violations.contains(&Violation::DanglingLink {
      class: 0,
      offset: 1 << 40
    }));
  }

  #[test]
  fn test_survives_garbage_sizes() {
    let (mut heap, ptrs) = heap_with_holes();
    write_word(heap.arena.as_bytes_mut(), ptrs[0] - WORD, Tag::new(1 << 30, true).raw());

    let report = heap.check(false);
    assert!(report.violations.contains(&Violation::OutOfBounds { offset: ptrs[0] }));
  }

  #[test]
  fn test_survives_corrupt_footer_before_free_block() {
    let (mut heap, ptrs) = heap_with_holes();
    let mem = heap.arena.as_bytes_mut();
    // Footer of the free block at ptrs[1] claims a huge size, and the
    // block after it is flipped to free.
    write_word(mem, ptrs[1] + 32 - OVERHEAD, Tag::new(1 << 20, false).raw());
    write_block(mem, ptrs[2], Tag::new(32, false));

    let report = heap.check(true);
    assert!(report.violations.contains(&Violation::Uncoalesced {
      offset: ptrs[1],
      next: ptrs[2],
    }));
    assert!(report.violations.iter().any(|v| matches!(
      v,
      Violation::TagMismatch { offset, .. } if *offset == ptrs[1]
    )));
  }

  #[test]
  fn test_detects_bad_prologue() {
    let (mut heap, _) = heap_with_holes();
    let prologue = heap.prologue;
    write_word(heap.arena.as_bytes_mut(), prologue - WORD, Tag::new(PROLOGUE_SIZE, false).raw());

    let report = heap.check(false);
    assert!(report.violations.contains(&Violation::BadPrologue { offset: prologue }));
  }
}
