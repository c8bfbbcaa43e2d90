use proptest::prelude::*;
use segalloc::{Heap, HeapConfig, HeapPtr};

#[derive(Clone, Debug)]
enum Op {
  Allocate(usize),
  Zeroed(usize, usize),
  Release(usize),
  Resize(usize, usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
  prop_oneof![
    4 => (1usize..600).prop_map(Op::Allocate),
    1 => (0usize..40, 0usize..40).prop_map(|(count, size)| Op::Zeroed(count, size)),
    3 => any::<usize>().prop_map(Op::Release),
    2 => (any::<usize>(), 0usize..2000).prop_map(|(index, size)| Op::Resize(index, size)),
  ]
}

fn arb_config() -> impl Strategy<Value = HeapConfig> {
  (32usize..2048, 1usize..16).prop_map(|(chunk_size, fit_window)| HeapConfig {
    chunk_size,
    fit_window,
    ..HeapConfig::default()
  })
}

/// A live block together with the byte its requested prefix is filled with.
struct Live {
  ptr: HeapPtr,
  size: usize,
  byte: u8,
}

fn assert_consistent(heap: &Heap) -> Result<(), TestCaseError> {
  let report = heap.check(false);
  prop_assert!(report.is_consistent(), "{:?}", report.violations);
  prop_assert_eq!(report.arena_free, report.list_free);
  Ok(())
}

fn assert_intact(
  heap: &Heap,
  live: &[Live],
) -> Result<(), TestCaseError> {
  for block in live {
    prop_assert!(heap.payload(block.ptr)[..block.size].iter().all(|&b| b == block.byte));
  }
  Ok(())
}

proptest! {
  #[test]
  fn random_operations_keep_heap_consistent(
    config in arb_config(),
    ops in prop::collection::vec(arb_op(), 1..120),
  ) {
    let mut heap = Heap::with_config(config).unwrap();
    let mut live: Vec<Live> = Vec::new();

    for (step, op) in ops.into_iter().enumerate() {
      let byte = step as u8;
      match op {
        Op::Allocate(size) => {
          let ptr = heap.allocate(size).unwrap();
          prop_assert_eq!(ptr.offset() % 8, 0);
          prop_assert!(ptr.offset() + size <= heap.arena_len());
          heap.payload_mut(ptr)[..size].fill(byte);
          live.push(Live { ptr, size, byte });
        }
        Op::Zeroed(count, size) => {
          let Some(ptr) = heap.zeroed_allocate(count, size) else {
            prop_assert_eq!(count * size, 0);
            continue;
          };
          prop_assert!(heap.payload(ptr).iter().all(|&b| b == 0));
          let size = count * size;
          heap.payload_mut(ptr)[..size].fill(byte);
          live.push(Live { ptr, size, byte });
        }
        Op::Release(index) => {
          if live.is_empty() {
            continue;
          }
          let block = live.swap_remove(index % live.len());
          heap.release(Some(block.ptr));
        }
        Op::Resize(index, size) => {
          if live.is_empty() {
            continue;
          }
          let block = live.swap_remove(index % live.len());
          let resized = heap.resize(Some(block.ptr), size);
          if size == 0 {
            prop_assert_eq!(resized, None);
          } else {
            let ptr = resized.unwrap();
            let kept = block.size.min(size);
            prop_assert!(heap.payload(ptr)[..kept].iter().all(|&b| b == block.byte));
            heap.payload_mut(ptr)[..size].fill(byte);
            live.push(Live { ptr, size, byte });
          }
        }
      }

      assert_consistent(&heap)?;
      assert_intact(&heap, &live)?;
    }

    for block in live.drain(..) {
      heap.release(Some(block.ptr));
    }
    assert_consistent(&heap)?;
    prop_assert_eq!(heap.stats().allocated_blocks, 0);
    prop_assert_eq!(heap.stats().free_blocks, 1);
  }

  #[test]
  fn release_then_allocate_reuses_free_space(
    sizes in prop::collection::vec(1usize..400, 1..20),
    pick in any::<usize>(),
    size in 1usize..400,
  ) {
    let mut heap = Heap::new().unwrap();
    let ptrs: Vec<_> = sizes.iter().map(|&s| heap.allocate(s).unwrap()).collect();

    let victim = heap.allocate(size).unwrap();
    heap.release(Some(victim));
    let free: Vec<_> = heap
      .blocks()
      .filter(|block| !block.allocated)
      .map(|block| block.ptr.offset()..block.ptr.offset() + block.size)
      .collect();
    let arena = heap.arena_len();

    let again = heap.allocate(size).unwrap();
    prop_assert_eq!(heap.arena_len(), arena);
    prop_assert!(free.iter().any(|span| span.contains(&again.offset())));

    heap.release(Some(ptrs[pick % ptrs.len()]));
    assert_consistent(&heap)?;
  }

  #[test]
  fn shrink_keeps_pointer_and_bytes(
    size in 1usize..1000,
    shrink in 0usize..16,
  ) {
    let mut heap = Heap::new().unwrap();
    let ptr = heap.allocate(size).unwrap();
    heap.payload_mut(ptr)[..size].fill(0x5A);

    let smaller = size.saturating_sub(shrink).max(1);
    prop_assert_eq!(heap.resize(Some(ptr), smaller), Some(ptr));
    prop_assert!(heap.payload(ptr)[..smaller].iter().all(|&b| b == 0x5A));
    assert_consistent(&heap)?;
  }
}

#[test]
fn freed_block_is_handed_out_again() {
  let mut heap = Heap::new().unwrap();
  let p1 = heap.allocate(16).unwrap();
  let p2 = heap.allocate(16).unwrap();
  assert_ne!(p1, p2);

  let arena = heap.arena_len();
  heap.release(Some(p1));
  assert_eq!(heap.allocate(16), Some(p1));
  assert_eq!(heap.arena_len(), arena);
}

#[test]
fn adjacent_releases_leave_one_free_block() {
  let mut heap = Heap::new().unwrap();
  let p1 = heap.allocate(16).unwrap();
  let p2 = heap.allocate(16).unwrap();
  assert_eq!(p2.offset(), p1.offset() + 32);

  heap.release(Some(p1));
  heap.release(Some(p2));

  let report = heap.check(false);
  assert!(report.is_consistent(), "{:?}", report.violations);
  assert_eq!(report.arena_free, 1);

  // The two blocks and the rest of the chunk are one free block now.
  let free: Vec<_> = heap.blocks().filter(|block| !block.allocated).collect();
  assert_eq!(free.len(), 1);
  assert_eq!(free[0].ptr, p1);
  assert!(free[0].size >= 64);
}

#[test]
fn resize_to_zero_releases() {
  let mut heap = Heap::new().unwrap();
  let ptr = heap.allocate(100);
  assert_eq!(heap.resize(ptr, 0), None);
  assert_eq!(heap.stats().allocated_blocks, 0);
  assert!(heap.check(false).is_consistent());
}

#[test]
fn resize_of_none_allocates() {
  let mut heap = Heap::new().unwrap();
  let ptr = heap.resize(None, 32).unwrap();
  assert!(heap.usable_size(ptr) >= 32);
  assert_eq!(heap.stats().allocated_blocks, 1);
}

#[test]
fn zeroed_allocate_clears_recycled_memory() {
  let mut heap = Heap::new().unwrap();
  let dirty = heap.allocate(32).unwrap();
  heap.payload_mut(dirty).fill(0xEE);
  heap.release(Some(dirty));

  let ptr = heap.zeroed_allocate(4, 8).unwrap();
  assert!(heap.payload(ptr)[..32].iter().all(|&b| b == 0));
}

#[cfg(unix)]
#[test]
fn mmap_heap_matches_vec_heap() {
  let mut vec_heap = Heap::new().unwrap();
  let mut mmap_heap = Heap::mmap(HeapConfig::default()).unwrap();

  for size in [8, 300, 24, 4096, 72] {
    let a = vec_heap.allocate(size).unwrap();
    let b = mmap_heap.allocate(size).unwrap();
    assert_eq!(a.offset(), b.offset());
  }
  assert_eq!(vec_heap.stats(), mmap_heap.stats());
  assert!(mmap_heap.check(false).is_consistent());
}
