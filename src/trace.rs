//! Allocation traces and a replayer that drives a [`Heap`] with them.
//!
//! A trace is plain text, one operation per line:
//!
//! ```text
//!   # id  size
//!   a 0 512        allocate 512 bytes as block 0
//!   c 1 16 8       zeroed-allocate 16 x 8 bytes as block 1
//!   r 0 1024       resize block 0 to 1024 bytes
//!   f 1            release block 1
//! ```
//!
//! Everything after a `#` is ignored, as are blank lines.

use std::{collections::HashMap, fmt, fs, io, path::Path, str::FromStr};

use thiserror::Error;
use tracing::{debug, trace};

use crate::{Heap, HeapError, HeapPtr, Violation, arena::Arena};

/// One line of a trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceOp {
  Allocate { id: usize, size: usize },
  Release { id: usize },
  Resize { id: usize, size: usize },
  ZeroedAllocate { id: usize, count: usize, size: usize },
}

impl TraceOp {
  pub fn id(&self) -> usize {
    match *self {
      TraceOp::Allocate { id, .. }
      | TraceOp::Release { id }
      | TraceOp::Resize { id, .. }
      | TraceOp::ZeroedAllocate { id, .. } => id,
    }
  }
}

#[derive(Debug, Error)]
pub enum TraceError {
  #[error("line {line}: {reason}")]
  Parse { line: usize, reason: String },

  #[error("line {line}: block {id} is not live")]
  UnknownId { line: usize, id: usize },

  #[error("line {line}: block {id} is already live")]
  DuplicateId { line: usize, id: usize },

  #[error("line {line}: allocating block {id} failed: {source}")]
  Allocate {
    line: usize,
    id: usize,
    #[source]
    source: HeapError,
  },

  #[error("line {line}: resizing block {id} to {size} bytes failed")]
  Resize { line: usize, id: usize, size: usize },

  #[error("line {line}: payload of block {id} was overwritten")]
  Corrupted { line: usize, id: usize },

  #[error("line {line}: heap check found {} violation(s)", .violations.len())]
  Inconsistent {
    line: usize,
    violations: Vec<Violation>,
  },

  #[error("failed to read trace: {0}")]
  Io(#[from] io::Error),
}

/// A parsed trace. Each operation keeps the line it came from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Trace {
  ops: Vec<(usize, TraceOp)>,
}

fn parse_field(
  line: usize,
  field: Option<&str>,
  what: &str,
) -> Result<usize, TraceError> {
  let field = field.ok_or_else(|| TraceError::Parse {
    line,
    reason: format!("missing {what}"),
  })?;

  field.parse().map_err(|err| TraceError::Parse {
    line,
    reason: format!("bad {what} {field:?}: {err}"),
  })
}

fn parse_line(
  line: usize,
  text: &str,
) -> Result<Option<TraceOp>, TraceError> {
  let text = text.split('#').next().unwrap_or_default();
  let mut fields = text.split_whitespace();
  let Some(op) = fields.next() else {
    return Ok(None);
  };

  let id = parse_field(line, fields.next(), "id")?;
  let op = match op {
    "a" => TraceOp::Allocate {
      id,
      size: parse_field(line, fields.next(), "size")?,
    },
    "f" => TraceOp::Release { id },
    "r" => TraceOp::Resize {
      id,
      size: parse_field(line, fields.next(), "size")?,
    },
    "c" => TraceOp::ZeroedAllocate {
      id,
      count: parse_field(line, fields.next(), "count")?,
      size: parse_field(line, fields.next(), "size")?,
    },
    other => {
      return Err(TraceError::Parse {
        line,
        reason: format!("unknown operation {other:?}"),
      });
    }
  };

  if let Some(extra) = fields.next() {
    return Err(TraceError::Parse {
      line,
      reason: format!("unexpected field {extra:?}"),
    });
  }

  Ok(Some(op))
}

impl FromStr for Trace {
  type Err = TraceError;

  fn from_str(text: &str) -> Result<Self, Self::Err> {
    let mut ops = Vec::new();
    for (index, line) in text.lines().enumerate() {
      if let Some(op) = parse_line(index + 1, line)? {
        ops.push((index + 1, op));
      }
    }
    Ok(Self { ops })
  }
}

impl Trace {
  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TraceError> {
    fs::read_to_string(path)?.parse()
  }

  /// Operations with their 1-based line numbers.
  pub fn ops(&self) -> impl Iterator<Item = (usize, TraceOp)> + '_ {
    self.ops.iter().copied()
  }

  pub fn len(&self) -> usize {
    self.ops.len()
  }

  pub fn is_empty(&self) -> bool {
    self.ops.is_empty()
  }
}

/// What a replay observed.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ReplaySummary {
  pub ops: usize,
  /// Highest sum of requested bytes live at the same time.
  pub peak_payload: usize,
  pub arena_bytes: usize,
}

impl ReplaySummary {
  /// Peak live payload over the final arena size.
  pub fn utilization(&self) -> f64 {
    if self.arena_bytes == 0 {
      return 0.0;
    }
    self.peak_payload as f64 / self.arena_bytes as f64
  }
}

impl fmt::Display for ReplaySummary {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "{} ops, peak payload {} B, arena {} B, utilization {:.1}%",
      self.ops,
      self.peak_payload,
      self.arena_bytes,
      self.utilization() * 100.0
    )
  }
}

fn pattern(
  id: usize,
  index: usize,
) -> u8 {
  (id.wrapping_mul(131) ^ index) as u8
}

fn fill(
  bytes: &mut [u8],
  id: usize,
) {
  for (index, byte) in bytes.iter_mut().enumerate() {
    *byte = pattern(id, index);
  }
}

fn intact(
  bytes: &[u8],
  id: usize,
) -> bool {
  bytes
    .iter()
    .enumerate()
    .all(|(index, &byte)| byte == pattern(id, index))
}

/// A live trace block: its handle (if the heap gave one) and requested size.
#[derive(Clone, Copy)]
struct Live {
  ptr: Option<HeapPtr>,
  size: usize,
}

struct Replayer<'h, A: Arena> {
  heap: &'h mut Heap<A>,
  live: HashMap<usize, Live>,
  live_bytes: usize,
  summary: ReplaySummary,
}

impl<A: Arena> Replayer<'_, A> {
  fn verify(
    &self,
    line: usize,
    id: usize,
    ptr: Option<HeapPtr>,
    len: usize,
  ) -> Result<(), TraceError> {
    match ptr {
      Some(ptr) if !intact(&self.heap.payload(ptr)[..len], id) => {
        Err(TraceError::Corrupted { line, id })
      }
      _ => Ok(()),
    }
  }

  fn insert(
    &mut self,
    id: usize,
    live: Live,
  ) {
    if let Some(ptr) = live.ptr {
      fill(&mut self.heap.payload_mut(ptr)[..live.size], id);
    }
    self.live.insert(id, live);
    self.live_bytes += live.size;
    self.summary.peak_payload = self.summary.peak_payload.max(self.live_bytes);
  }

  fn take(
    &mut self,
    line: usize,
    id: usize,
  ) -> Result<Live, TraceError> {
    let live = self
      .live
      .remove(&id)
      .ok_or(TraceError::UnknownId { line, id })?;
    self.live_bytes -= live.size;
    Ok(live)
  }

  fn apply(
    &mut self,
    line: usize,
    op: TraceOp,
  ) -> Result<(), TraceError> {
    match op {
      TraceOp::Allocate { id, size } => {
        if self.live.contains_key(&id) {
          return Err(TraceError::DuplicateId { line, id });
        }
        let ptr = match self.heap.try_allocate(size) {
          Ok(ptr) => Some(ptr),
          Err(HeapError::ZeroSize) => None,
          Err(source) => return Err(TraceError::Allocate { line, id, source }),
        };
        self.insert(id, Live { ptr, size });
        Ok(())
      }

      TraceOp::ZeroedAllocate { id, count, size } => {
        if self.live.contains_key(&id) {
          return Err(TraceError::DuplicateId { line, id });
        }
        let ptr = match self.heap.try_zeroed_allocate(count, size) {
          Ok(ptr) => Some(ptr),
          Err(HeapError::ZeroSize) => None,
          Err(source) => return Err(TraceError::Allocate { line, id, source }),
        };
        let size = count * size;
        let zeroed = ptr.is_none_or(|ptr| self.heap.payload(ptr)[..size].iter().all(|&b| b == 0));
        if !zeroed {
          return Err(TraceError::Corrupted { line, id });
        }
        self.insert(id, Live { ptr, size });
        Ok(())
      }

      TraceOp::Release { id } => {
        let live = self.take(line, id)?;
        self.verify(line, id, live.ptr, live.size)?;
        self.heap.release(live.ptr);
        Ok(())
      }

      TraceOp::Resize { id, size } => {
        let live = self.take(line, id)?;
        self.verify(line, id, live.ptr, live.size)?;

        let ptr = self.heap.resize(live.ptr, size);
        if size == 0 {
          self.insert(id, Live { ptr: None, size: 0 });
          return Ok(());
        }
        if ptr.is_none() {
          // The old block is still valid; keep tracking it.
          self.live.insert(id, live);
          self.live_bytes += live.size;
          return Err(TraceError::Resize { line, id, size });
        }

        self.verify(line, id, ptr, live.size.min(size))?;
        self.insert(id, Live { ptr, size });
        Ok(())
      }
    }
  }
}

/// Runs every operation of `trace` against `heap`.
///
/// Payloads are filled with a pattern derived from the block id and checked
/// again on release and resize. With `check_each`, the heap checker runs
/// after every operation and the first inconsistency stops the replay.
pub fn replay<A: Arena>(
  heap: &mut Heap<A>,
  trace: &Trace,
  check_each: bool,
) -> Result<ReplaySummary, TraceError> {
  debug!(ops = trace.len(), check_each, "replaying trace");

  let mut replayer = Replayer {
    heap,
    live: HashMap::new(),
    live_bytes: 0,
    summary: ReplaySummary::default(),
  };

  for (line, op) in trace.ops() {
    trace!(line, ?op, "replay");
    replayer.apply(line, op)?;
    replayer.summary.ops += 1;

    if check_each {
      let report = replayer.heap.check(false);
      if !report.is_consistent() {
        return Err(TraceError::Inconsistent {
          line,
          violations: report.violations,
        });
      }
    }
  }

  let mut summary = replayer.summary;
  summary.arena_bytes = replayer.heap.arena_len();
  debug!(%summary, "trace finished");
  Ok(summary)
}
