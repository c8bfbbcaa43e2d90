//! # segalloc - A Segregated Free-List Heap
//!
//! This crate implements a general-purpose heap allocator in the classic
//! boundary-tag style: blocks carry a header and a footer, free blocks are
//! kept in a handful of size-class buckets, and neighbouring free blocks are
//! merged the moment they appear.
//!
//! ## Overview
//!
//! The heap lives inside a single contiguous [`Arena`] that only ever grows
//! at the top, like a program break. Everything the heap hands out is a
//! [`HeapPtr`]: a byte offset of a payload inside that arena.
//!
//! ```text
//!   Arena Layout:
//!
//!   0        8                 24                                  brk
//!   ┌────────┬─────────────────┬──────────┬──────────┬─────┬────────┐
//!   │  pad   │ prologue [16:a] │ block    │ block    │ ... │ [0:a]  │
//!   │        │   hdr  │  ftr   │          │          │     │ epilog │
//!   └────────┴─────────────────┴──────────┴──────────┴─────┴────────┘
//!
//!   The prologue and epilogue are permanently allocated, so every real
//!   block has an allocated-looking neighbour on both sides.
//! ```
//!
//! Every block is a multiple of 8 bytes and at least 32 bytes long:
//!
//! ```text
//!   Allocated Block:                     Free Block:
//!
//!   ┌──────────────────┐                 ┌──────────────────┐
//!   │ header [size:a]  │  8 B            │ header [size:f]  │
//!   ├──────────────────┤ ◄── HeapPtr     ├──────────────────┤ ◄── bp
//!   │                  │                 │ next free (bp)   │
//!   │     payload      │                 │ prev free (bp+8) │
//!   │                  │                 │ ...              │
//!   ├──────────────────┤                 ├──────────────────┤
//!   │ footer [size:a]  │  8 B            │ footer [size:f]  │
//!   └──────────────────┘                 └──────────────────┘
//! ```
//!
//! Free blocks are threaded through five buckets. Bucket `i` holds blocks
//! whose size in 32-byte units falls in `[6^i, 6^(i+1))`, the last bucket
//! takes everything from 1296 units up:
//!
//! ```text
//!   Segregated Lists:
//!
//!   bucket 0  ──► [ 32 ] ◄─► [ 96 ] ◄─► [ 64 ] ──► NIL
//!   bucket 1  ──► [ 480 ] ──► NIL
//!   bucket 2  ──► NIL
//!   bucket 3  ──► [ 12288 ] ──► NIL
//!   bucket 4  ──► NIL
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - Alignment macro and helpers
//!   ├── arena      - Arena trait and the Vec-backed provider
//!   ├── mmap       - mmap(2)-backed provider (unix)
//!   ├── block      - Boundary tags (internal)
//!   ├── class      - Size-class index
//!   ├── freelist   - Intrusive doubly linked buckets (internal)
//!   ├── coalesce   - Merging of free neighbours (internal)
//!   ├── heap       - The allocator itself
//!   ├── check      - Heap consistency checker
//!   ├── config     - Tuning knobs
//!   ├── error      - Error types
//!   └── trace      - Trace parsing and replay
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::Heap;
//!
//! let mut heap = Heap::new().unwrap();
//!
//! let ptr = heap.allocate(64).unwrap();
//! heap.payload_mut(ptr)[..5].copy_from_slice(b"hello");
//!
//! let ptr = heap.resize(Some(ptr), 256).unwrap();
//! assert_eq!(&heap.payload(ptr)[..5], b"hello");
//!
//! heap.release(Some(ptr));
//! assert!(heap.check(false).is_consistent());
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: a [`Heap`] needs `&mut self` for every change
//! - **No shrinking**: the arena never gives memory back
//! - **Trusting release**: foreign or double-released pointers corrupt the
//!   heap; only [`Heap::check`] notices

pub mod align;
pub mod arena;
mod block;
pub mod check;
pub mod class;
mod coalesce;
pub mod config;
pub mod error;
mod freelist;
pub mod heap;
#[cfg(unix)]
pub mod mmap;
pub mod trace;

pub use arena::{Arena, VecArena};
pub use block::Tag;
pub use check::{HeapReport, Violation};
pub use config::HeapConfig;
pub use error::{ArenaError, ConfigError, HeapError};
pub use heap::{BlockInfo, Blocks, Heap, HeapPtr, HeapStats};
#[cfg(unix)]
pub use mmap::MmapArena;
pub use trace::{ReplaySummary, Trace, TraceError, TraceOp};
