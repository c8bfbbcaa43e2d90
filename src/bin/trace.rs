//! Replays allocation traces against a fresh heap per file.
//!
//! ```text
//!   segalloc-trace --check traces/*.rep
//!   RUST_LOG=segalloc=debug segalloc-trace --mmap --fit-window 4 short.rep
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::Parser;
use segalloc::{Heap, HeapConfig, Trace, arena::Arena, trace::replay};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Replay allocation traces and report heap utilization.
#[derive(Debug, Parser)]
#[command(name = "segalloc-trace")]
#[command(about = "Replay allocation traces against the segregated free-list heap")]
struct Cli {
  /// Trace files to replay, one fresh heap each.
  #[arg(required = true)]
  traces: Vec<PathBuf>,

  /// Run the heap checker after every operation.
  #[arg(long)]
  check: bool,

  /// Dump every block after each trace.
  #[arg(short, long)]
  verbose: bool,

  /// Minimum arena growth in bytes.
  #[arg(long, default_value_t = HeapConfig::DEFAULT_CHUNK_SIZE)]
  chunk_size: usize,

  /// Sufficient candidates examined per bucket.
  #[arg(long, default_value_t = HeapConfig::DEFAULT_FIT_WINDOW)]
  fit_window: usize,

  /// Arena size limit in bytes.
  #[arg(long, default_value_t = HeapConfig::DEFAULT_MAX_HEAP)]
  max_heap: usize,

  /// Back the heap with an mmap(2) reservation instead of a Vec.
  #[arg(long)]
  mmap: bool,
}

impl Cli {
  fn config(&self) -> HeapConfig {
    HeapConfig {
      chunk_size: self.chunk_size,
      fit_window: self.fit_window,
      max_heap: self.max_heap,
    }
  }
}

fn run<A: Arena>(
  mut heap: Heap<A>,
  trace: &Trace,
  cli: &Cli,
) -> anyhow::Result<()> {
  let summary = replay(&mut heap, trace, cli.check)?;
  println!("  {summary}");

  let report = heap.check(cli.verbose);
  if !report.is_consistent() {
    bail!("heap inconsistent after replay: {:?}", report.violations);
  }
  Ok(())
}

#[cfg(unix)]
fn run_mmap(
  trace: &Trace,
  cli: &Cli,
) -> anyhow::Result<()> {
  run(Heap::mmap(cli.config())?, trace, cli)
}

#[cfg(not(unix))]
fn run_mmap(
  _trace: &Trace,
  _cli: &Cli,
) -> anyhow::Result<()> {
  bail!("--mmap is only available on unix targets")
}

fn replay_file(
  path: &Path,
  cli: &Cli,
) -> anyhow::Result<()> {
  let trace = Trace::from_path(path).with_context(|| format!("loading {}", path.display()))?;
  info!(path = %path.display(), ops = trace.len(), "loaded trace");
  println!("{}:", path.display());

  if cli.mmap {
    return run_mmap(&trace, cli);
  }

  run(Heap::with_config(cli.config())?, &trace, cli)
}

fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let cli = Cli::parse();
  cli.config().validate().context("invalid heap configuration")?;

  let mut failed = 0;
  for path in &cli.traces {
    if let Err(err) = replay_file(path, &cli) {
      error!(path = %path.display(), "{err:#}");
      println!("  FAILED: {err:#}");
      failed += 1;
    }
  }

  if failed > 0 {
    bail!("{failed} of {} traces failed", cli.traces.len());
  }
  Ok(())
}
