//! Boundary-tag block layout.
//!
//! ```text
//!            bp (payload offset)
//!            │
//!   ┌────────┼──────────────────────────────────────┬────────┐
//!   │ header │ payload                              │ footer │
//!   │ 8 B    │ free: [next: 8 B][prev: 8 B] ...     │ 8 B    │
//!   └────────┴──────────────────────────────────────┴────────┘
//!   ◄──────────────────────── size ────────────────────────────►
//! ```
//!
//! Header and footer hold the same [`Tag`]. The footer lets us step to the
//! physically previous block in O(1).

use std::fmt;

use crate::align::{ALIGNMENT, is_aligned};

/// Width of a header/footer tag and of a free-list link slot.
pub const WORD: usize = 8;

/// Bytes of bookkeeping carried by every block (header + footer).
pub const OVERHEAD: usize = 2 * WORD;

/// Header + footer + `next` + `prev`.
pub const MIN_BLOCK_SIZE: usize = 4 * WORD;

/// The prologue sentinel is a header and a footer with nothing in between.
pub const PROLOGUE_SIZE: usize = OVERHEAD;

const ALLOCATED_BIT: u64 = 0x1;
const SIZE_MASK: u64 = !(ALIGNMENT as u64 - 1);

/// Typed view over one header or footer word.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Tag(u64);

impl Tag {
  /// Packs a size and an allocation bit.
  ///
  /// # Panics
  ///
  /// Panics if `size` is not a multiple of [`ALIGNMENT`]: the low bits are
  /// reserved for flags.
  pub fn new(
    size: usize,
    allocated: bool,
  ) -> Self {
    assert!(is_aligned(size), "block size {size} is not {ALIGNMENT}-byte aligned");
    let mut raw = size as u64;
    if allocated {
      raw |= ALLOCATED_BIT;
    }
    Self(raw)
  }

  pub fn from_raw(raw: u64) -> Self {
    Self(raw)
  }

  pub fn raw(self) -> u64 {
    self.0
  }

  pub fn size(self) -> usize {
    (self.0 & SIZE_MASK) as usize
  }

  pub fn is_allocated(self) -> bool {
    self.0 & ALLOCATED_BIT != 0
  }
}

impl fmt::Debug for Tag {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    let state = if self.is_allocated() { 'a' } else { 'f' };
    write!(f, "[{}:{}]", self.size(), state)
  }
}

pub(crate) fn read_word(
  mem: &[u8],
  at: usize,
) -> u64 {
  let mut word = [0u8; WORD];
  word.copy_from_slice(&mem[at..at + WORD]);
  u64::from_ne_bytes(word)
}

/// Bounds-checked variant of [`read_word`] for the validator, which must
/// survive a corrupted arena.
pub(crate) fn try_read_word(
  mem: &[u8],
  at: usize,
) -> Option<u64> {
  let end = at.checked_add(WORD)?;
  let bytes = mem.get(at..end)?;
  let mut word = [0u8; WORD];
  word.copy_from_slice(bytes);
  Some(u64::from_ne_bytes(word))
}

pub(crate) fn write_word(
  mem: &mut [u8],
  at: usize,
  value: u64,
) {
  mem[at..at + WORD].copy_from_slice(&value.to_ne_bytes());
}

pub(crate) fn header_offset(bp: usize) -> usize {
  bp - WORD
}

pub(crate) fn footer_offset(
  bp: usize,
  size: usize,
) -> usize {
  bp + size - OVERHEAD
}

pub(crate) fn header(
  mem: &[u8],
  bp: usize,
) -> Tag {
  Tag::from_raw(read_word(mem, header_offset(bp)))
}

pub(crate) fn write_header(
  mem: &mut [u8],
  bp: usize,
  tag: Tag,
) {
  write_word(mem, header_offset(bp), tag.raw());
}

/// Writes `tag` into both the header and the footer of the block at `bp`.
/// The footer position is derived from the new size.
pub(crate) fn write_block(
  mem: &mut [u8],
  bp: usize,
  tag: Tag,
) {
  write_word(mem, header_offset(bp), tag.raw());
  write_word(mem, footer_offset(bp, tag.size()), tag.raw());
}

/// Payload offset of the physically next block.
pub(crate) fn next_block(
  mem: &[u8],
  bp: usize,
) -> usize {
  bp + header(mem, bp).size()
}

/// Tag of the physically previous block, read from its footer.
pub(crate) fn prev_tag(
  mem: &[u8],
  bp: usize,
) -> Tag {
  Tag::from_raw(read_word(mem, bp - OVERHEAD))
}

/// Payload offset of the physically previous block.
pub(crate) fn prev_block(
  mem: &[u8],
  bp: usize,
) -> usize {
  bp - prev_tag(mem, bp).size()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_tag_packing() {
    let tag = Tag::new(48, true);
    assert_eq!(tag.size(), 48);
    assert!(tag.is_allocated());
    assert_eq!(tag.raw(), 49);

    let tag = Tag::new(48, false);
    assert_eq!(tag.size(), 48);
    assert!(!tag.is_allocated());
  }

  #[test]
  fn test_tag_masks_flag_bits() {
    let tag = Tag::from_raw(0x47);
    assert_eq!(tag.size(), 0x40);
    assert!(tag.is_allocated());
  }

  #[test]
  #[should_panic]
  fn test_tag_rejects_unaligned_size() {
    Tag::new(30, false);
  }

  #[test]
  fn test_block_navigation() {
    let mut mem = vec![0u8; 128];
    // Two blocks back to back: [8..40) and [40..104).
    write_block(&mut mem, 16, Tag::new(32, true));
    write_block(&mut mem, 48, Tag::new(64, false));

    assert_eq!(next_block(&mem, 16), 48);
    assert_eq!(prev_block(&mem, 48), 16);
    assert_eq!(prev_tag(&mem, 48), header(&mem, 16));
    // Footer of the second block, seen from where a third would start.
    assert_eq!(prev_tag(&mem, 112), Tag::new(64, false));
  }

  #[test]
  fn test_try_read_word_out_of_bounds() {
    let mem = vec![0u8; 16];
    assert_eq!(try_read_word(&mem, 8), Some(0));
    assert_eq!(try_read_word(&mem, 9), None);
    assert_eq!(try_read_word(&mem, usize::MAX), None);
  }
}
