use std::io::Read;

use segalloc::{Heap, HeapConfig, HeapPtr};

/// Waits until the user presses ENTER.
/// Set `SEGALLOC_NO_PAUSE` to run straight through.
fn block_until_enter_pressed() {
  if std::env::var_os("SEGALLOC_NO_PAUSE").is_some() {
    return;
  }
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints one line per physical block plus the arena size.
fn print_heap(
  label: &str,
  heap: &Heap,
) {
  let stats = heap.stats();
  println!(
    "[{label}] arena = {} B, {} allocated ({} B), {} free ({} B, largest {} B)",
    stats.arena_bytes,
    stats.allocated_blocks,
    stats.allocated_bytes,
    stats.free_blocks,
    stats.free_bytes,
    stats.largest_free,
  );
  for block in heap.blocks() {
    println!(
      "    {:>8}  {:>6} B  {}",
      block.ptr.to_string(),
      block.size,
      if block.allocated { "allocated" } else { "free" }
    );
  }
}

fn print_alloc(
  what: &str,
  heap: &Heap,
  ptr: Option<HeapPtr>,
) {
  match ptr {
    Some(ptr) => println!(
      "{what}: payload at {ptr}, {} usable bytes",
      heap.usable_size(ptr)
    ),
    None => println!("{what}: no block"),
  }
}

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .init();

  let mut heap = match Heap::with_config(HeapConfig::default()) {
    Ok(heap) => heap,
    Err(err) => {
      eprintln!("cannot create heap: {err}");
      return;
    }
  };

  // Initial state: sentinels plus one free chunk.
  print_heap("start", &heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Three small blocks carved out of the initial chunk.
  // --------------------------------------------------------------------
  let a = heap.allocate(16);
  let b = heap.allocate(40);
  let c = heap.allocate(16);
  println!("\n[1] Allocate 16, 40 and 16 bytes");
  print_alloc("a", &heap, a);
  print_alloc("b", &heap, b);
  print_alloc("c", &heap, c);
  print_heap("1", &heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Free the middle block. Both neighbours are allocated, so it sits
  //    alone in its bucket.
  // --------------------------------------------------------------------
  heap.release(b);
  println!("\n[2] Release b");
  print_heap("2", &heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Free the first block. It merges with the free block after it.
  // --------------------------------------------------------------------
  heap.release(a);
  println!("\n[3] Release a (merges with b)");
  print_heap("3", &heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) A request that fits the merged hole reuses it.
  // --------------------------------------------------------------------
  let d = heap.allocate(60);
  println!("\n[4] Allocate 60 bytes");
  print_alloc("d", &heap, d);
  println!(
    "[4] d == a? {}",
    if d == a {
      "Yes, it reused the merged block"
    } else {
      "No, it allocated somewhere else"
    }
  );
  print_heap("4", &heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) Grow c past what is free behind it and watch the data follow.
  // --------------------------------------------------------------------
  if let Some(ptr) = c {
    heap.payload_mut(ptr)[..4].copy_from_slice(b"segs");
  }
  let c = heap.resize(c, 4000);
  println!("\n[5] Resize c to 4000 bytes");
  print_alloc("c", &heap, c);
  if let Some(ptr) = c {
    println!("[5] First bytes of c: {:?}", String::from_utf8_lossy(&heap.payload(ptr)[..4]));
  }
  print_heap("5", &heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 6) Release everything and let the checker walk the result.
  // --------------------------------------------------------------------
  heap.release(c);
  heap.release(d);
  println!("\n[6] Release everything");
  print_heap("6", &heap);

  let report = heap.check(true);
  println!(
    "[6] check: {} blocks, {} free, {} violations",
    report.blocks,
    report.arena_free,
    report.violations.len()
  );
}
