use std::fmt;

use tracing::{debug, trace, warn};

use crate::{
  align,
  align::checked_align,
  arena::{Arena, VecArena},
  block::{
    MIN_BLOCK_SIZE, OVERHEAD, PROLOGUE_SIZE, Tag, WORD, header, next_block, write_block,
    write_header, write_word,
  },
  class::{CLASS_COUNT, bucket},
  config::{HeapConfig, SENTINEL_BYTES},
  error::{ArenaError, HeapError},
  freelist::{FreeLists, next_free},
};

#[cfg(unix)]
use crate::mmap::MmapArena;

/// Payload handle returned by the heap: a byte offset into the arena.
///
/// The null pointer of the C interface is `Option::<HeapPtr>::None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapPtr(usize);

impl HeapPtr {
  pub(crate) fn new(bp: usize) -> Self {
    Self(bp)
  }

  /// Offset of the first payload byte from the arena base.
  pub fn offset(self) -> usize {
    self.0
  }
}

impl fmt::Display for HeapPtr {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "{:#x}", self.0)
  }
}

/// One physical block, as seen by [`Heap::blocks`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
  pub ptr: HeapPtr,
  /// Total block size, header and footer included.
  pub size: usize,
  pub allocated: bool,
}

/// Summary of the physical block layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
  pub arena_bytes: usize,
  pub allocated_blocks: usize,
  pub allocated_bytes: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub largest_free: usize,
}

/// Block size needed to serve a `size`-byte request, or `None` if it does
/// not fit in a `usize`.
pub(crate) fn adjusted_size(size: usize) -> Option<usize> {
  if size <= OVERHEAD {
    return Some(MIN_BLOCK_SIZE);
  }
  checked_align(size.checked_add(OVERHEAD)?)
}

/// Segregated free-list heap over a single growable arena.
///
/// Not thread-safe: wrap it in a mutex if several threads need it.
pub struct Heap<A: Arena = VecArena> {
  pub(crate) arena: A,
  pub(crate) lists: FreeLists,
  /// Payload offset of the prologue sentinel.
  pub(crate) prologue: usize,
  config: HeapConfig,
}

impl Heap<VecArena> {
  /// Heap with the default configuration over a [`VecArena`].
  pub fn new() -> Result<Self, HeapError> {
    Self::with_config(HeapConfig::default())
  }

  pub fn with_config(config: HeapConfig) -> Result<Self, HeapError> {
    config.validate()?;
    let arena = VecArena::new(config.max_heap);
    Self::with_arena(arena, config)
  }
}

#[cfg(unix)]
impl Heap<MmapArena> {
  /// Heap over an [`MmapArena`] reserving `config.max_heap` bytes.
  pub fn mmap(config: HeapConfig) -> Result<Self, HeapError> {
    config.validate()?;
    let arena = MmapArena::new(config.max_heap)?;
    Self::with_arena(arena, config)
  }
}

impl<A: Arena> Heap<A> {
  /// Lays out the sentinels in `arena` and seeds the heap with one free
  /// chunk.
  ///
  /// ```text
  ///   ┌─────────┬──────────────────┬───────────────────┬──────────┐
  ///   │ padding │ prologue hdr/ftr │ free chunk ...    │ epilogue │
  ///   │   8 B   │   [16:a][16:a]   │                   │  [0:a]   │
  ///   └─────────┴──────────────────┴───────────────────┴──────────┘
  /// ```
  pub fn with_arena(
    arena: A,
    config: HeapConfig,
  ) -> Result<Self, HeapError> {
    config.validate()?;

    let mut heap = Self {
      arena,
      lists: FreeLists::new(),
      prologue: 0,
      config,
    };

    let start = heap.arena.len();
    let padding = align!(start) - start;
    let base = heap.arena.grow(padding + SENTINEL_BYTES)? + padding;

    let prologue = base + 2 * WORD;
    let mem = heap.arena.as_bytes_mut();
    write_word(mem, base, 0);
    write_block(mem, prologue, Tag::new(PROLOGUE_SIZE, true));
    write_header(mem, prologue + PROLOGUE_SIZE, Tag::new(0, true));
    heap.prologue = prologue;

    heap.extend(heap.config.aligned_chunk())?;
    Ok(heap)
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  pub fn arena(&self) -> &A {
    &self.arena
  }

  pub fn arena_len(&self) -> usize {
    self.arena.len()
  }

  /// Allocates at least `size` bytes. Returns `None` for `size == 0` or
  /// when the arena cannot grow.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Option<HeapPtr> {
    self.try_allocate(size).ok()
  }

  pub fn try_allocate(
    &mut self,
    size: usize,
  ) -> Result<HeapPtr, HeapError> {
    if size == 0 {
      return Err(HeapError::ZeroSize);
    }
    let asize = adjusted_size(size).ok_or(HeapError::TooLarge { size })?;

    if let Some(bp) = self.find_fit(asize) {
      self.place(bp, asize);
      trace!(ptr = bp, size, block = asize, "allocate: reused free block");
      return Ok(HeapPtr::new(bp));
    }

    let bp = self.extend(asize.max(self.config.aligned_chunk()))?;
    self.place(bp, asize);
    trace!(ptr = bp, size, block = asize, "allocate: grew arena");
    Ok(HeapPtr::new(bp))
  }

  /// Returns a block to the heap. `None` is a no-op.
  ///
  /// Passing a pointer that did not come from this heap, or releasing it
  /// twice, corrupts the heap. [`Heap::check`] is the only way to notice.
  pub fn release(
    &mut self,
    ptr: Option<HeapPtr>,
  ) {
    let Some(ptr) = ptr else {
      return;
    };

    let bp = ptr.offset();
    let mem = self.arena.as_bytes_mut();
    let size = header(mem, bp).size();
    write_block(mem, bp, Tag::new(size, false));
    trace!(ptr = bp, block = size, "release");
    self.coalesce(bp);
  }

  /// Resizes the block at `ptr`, keeping `min(old, size)` payload bytes.
  ///
  /// - `size == 0` releases `ptr` and returns `None`.
  /// - `ptr == None` behaves like [`Heap::allocate`].
  /// - If the block has to move and the arena cannot grow, `None` is
  ///   returned and `ptr` stays valid and untouched.
  pub fn resize(
    &mut self,
    ptr: Option<HeapPtr>,
    size: usize,
  ) -> Option<HeapPtr> {
    if size == 0 {
      self.release(ptr);
      return None;
    }
    let Some(ptr) = ptr else {
      return self.allocate(size);
    };

    let asize = adjusted_size(size)?;
    let bp = ptr.offset();
    let old_size = header(self.arena.as_bytes(), bp).size();

    if asize == old_size {
      return Some(ptr);
    }

    if asize < old_size {
      if old_size - asize >= MIN_BLOCK_SIZE {
        let mem = self.arena.as_bytes_mut();
        write_block(mem, bp, Tag::new(asize, true));
        let rest = bp + asize;
        write_block(mem, rest, Tag::new(old_size - asize, false));
        trace!(ptr = bp, from = old_size, to = asize, "resize: shrank in place");
        self.coalesce(rest);
      }
      return Some(ptr);
    }

    let mem = self.arena.as_bytes();
    let next = next_block(mem, bp);
    let next_tag = header(mem, next);
    if !next_tag.is_allocated() && asize <= old_size + next_tag.size() {
      let merged = old_size + self.unlink(next);
      write_block(self.arena.as_bytes_mut(), bp, Tag::new(merged, true));
      trace!(ptr = bp, from = old_size, to = merged, "resize: absorbed next block");
      return Some(ptr);
    }

    let moved = self.allocate(size)?;
    let keep = (old_size - OVERHEAD).min(size);
    self
      .arena
      .as_bytes_mut()
      .copy_within(bp..bp + keep, moved.offset());
    trace!(from = bp, to = moved.offset(), bytes = keep, "resize: moved");
    self.release(Some(ptr));
    Some(moved)
  }

  /// Allocates `count * size` zeroed bytes. Returns `None` on overflow,
  /// on a zero-byte request, or when the arena cannot grow.
  pub fn zeroed_allocate(
    &mut self,
    count: usize,
    size: usize,
  ) -> Option<HeapPtr> {
    self.try_zeroed_allocate(count, size).ok()
  }

  pub fn try_zeroed_allocate(
    &mut self,
    count: usize,
    size: usize,
  ) -> Result<HeapPtr, HeapError> {
    let bytes = count
      .checked_mul(size)
      .ok_or(HeapError::Overflow { count, size })?;
    let ptr = self.try_allocate(bytes)?;
    self.payload_mut(ptr).fill(0);
    Ok(ptr)
  }

  /// Payload bytes of a live block. The slice may be longer than the size
  /// originally requested.
  pub fn payload(
    &self,
    ptr: HeapPtr,
  ) -> &[u8] {
    let bp = ptr.offset();
    let mem = self.arena.as_bytes();
    let size = header(mem, bp).size();
    &mem[bp..bp + size - OVERHEAD]
  }

  pub fn payload_mut(
    &mut self,
    ptr: HeapPtr,
  ) -> &mut [u8] {
    let bp = ptr.offset();
    let mem = self.arena.as_bytes_mut();
    let size = header(mem, bp).size();
    &mut mem[bp..bp + size - OVERHEAD]
  }

  pub fn usable_size(
    &self,
    ptr: HeapPtr,
  ) -> usize {
    header(self.arena.as_bytes(), ptr.offset()).size() - OVERHEAD
  }

  /// Physical blocks between the prologue and the epilogue, in address
  /// order.
  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      mem: self.arena.as_bytes(),
      bp: self.prologue + PROLOGUE_SIZE,
    }
  }

  pub fn stats(&self) -> HeapStats {
    let mut stats = HeapStats {
      arena_bytes: self.arena.len(),
      ..HeapStats::default()
    };

    for block in self.blocks() {
      if block.allocated {
        stats.allocated_blocks += 1;
        stats.allocated_bytes += block.size;
      } else {
        stats.free_blocks += 1;
        stats.free_bytes += block.size;
        stats.largest_free = stats.largest_free.max(block.size);
      }
    }

    stats
  }

  /// Grows the arena by `size` bytes, turns the new space into a free block
  /// and merges it with a free block that ended at the old top.
  fn extend(
    &mut self,
    size: usize,
  ) -> Result<usize, ArenaError> {
    let bp = self.arena.grow(size).inspect_err(|err| {
      warn!(requested = size, arena = self.arena.len(), %err, "arena growth failed");
    })?;
    debug!(base = bp, size, arena = self.arena.len(), "grew arena");

    let mem = self.arena.as_bytes_mut();
    write_block(mem, bp, Tag::new(size, false));
    write_header(mem, bp + size, Tag::new(0, true));
    Ok(self.coalesce(bp))
  }

  /// Bounded best fit: the first bucket holding any sufficient block wins,
  /// and within it only the first `fit_window` sufficient blocks are
  /// compared.
  fn find_fit(
    &self,
    asize: usize,
  ) -> Option<usize> {
    let mem = self.arena.as_bytes();

    for class in bucket(asize)..CLASS_COUNT {
      let mut best: Option<(usize, usize)> = None;
      let mut fits = 0;
      let mut cursor = self.lists.head(class);

      while let Some(bp) = cursor {
        if fits == self.config.fit_window {
          break;
        }

        let size = header(mem, bp).size();
        if asize <= size {
          if best.is_none_or(|(_, smallest)| size < smallest) {
            if size == asize {
              return Some(bp);
            }
            best = Some((bp, size));
          }
          fits += 1;
        }

        cursor = next_free(mem, bp);
      }

      if let Some((bp, _)) = best {
        return Some(bp);
      }
    }

    None
  }

  /// Marks `asize` bytes of the free block at `bp` as allocated, splitting
  /// off the rest when it can stand alone as a block.
  fn place(
    &mut self,
    bp: usize,
    asize: usize,
  ) {
    let csize = self.unlink(bp);
    let mem = self.arena.as_bytes_mut();

    if csize - asize >= MIN_BLOCK_SIZE {
      write_block(mem, bp, Tag::new(asize, true));
      let rest = bp + asize;
      write_block(mem, rest, Tag::new(csize - asize, false));
      self.coalesce(rest);
    } else {
      write_block(mem, bp, Tag::new(csize, true));
    }
  }
}

/// Iterator returned by [`Heap::blocks`].
pub struct Blocks<'a> {
  mem: &'a [u8],
  bp: usize,
}

impl Iterator for Blocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<BlockInfo> {
    let tag = header(self.mem, self.bp);
    if tag.size() == 0 {
      return None;
    }

    let info = BlockInfo {
      ptr: HeapPtr::new(self.bp),
      size: tag.size(),
      allocated: tag.is_allocated(),
    };
    self.bp += tag.size();
    Some(info)
  }
}
