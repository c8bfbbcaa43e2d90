//! Size-class index.
//!
//! Block sizes are normalized by [`MIN_BLOCK_SIZE`] and partitioned by
//! powers of [`CLASS_RATIO`]:
//!
//! ```text
//!   class 0: [6^0, 6^1 - 1]    x 32 B
//!   class 1: [6^1, 6^2 - 1]    x 32 B
//!   class 2: [6^2, 6^3 - 1]    x 32 B
//!   class 3: [6^3, 6^4 - 1]    x 32 B
//!   class 4: [6^4, infinity)   x 32 B
//! ```

use crate::block::MIN_BLOCK_SIZE;

/// Number of segregated free lists.
pub const CLASS_COUNT: usize = 5;

/// Geometric ratio between neighbouring classes.
pub const CLASS_RATIO: usize = 6;

/// Normalized size at which the last, unbounded class starts
/// (`CLASS_RATIO ^ (CLASS_COUNT - 1)`).
pub const LAST_CLASS_FLOOR: usize = 1296;

/// Maps a block size to its bucket. Monotonic in `size`.
pub fn bucket(size: usize) -> usize {
  let mut quotient = size / MIN_BLOCK_SIZE;
  if quotient >= LAST_CLASS_FLOOR {
    return CLASS_COUNT - 1;
  }

  let mut class = 0;
  quotient /= CLASS_RATIO;
  while quotient != 0 {
    class += 1;
    quotient /= CLASS_RATIO;
  }
  class
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_last_class_floor_matches_ratio() {
    assert_eq!(LAST_CLASS_FLOOR, CLASS_RATIO.pow(CLASS_COUNT as u32 - 1));
  }

  #[test]
  fn test_class_boundaries() {
    assert_eq!(bucket(MIN_BLOCK_SIZE), 0);
    assert_eq!(bucket(5 * MIN_BLOCK_SIZE + 24), 0);
    assert_eq!(bucket(6 * MIN_BLOCK_SIZE), 1);
    assert_eq!(bucket(35 * MIN_BLOCK_SIZE), 1);
    assert_eq!(bucket(36 * MIN_BLOCK_SIZE), 2);
    assert_eq!(bucket(216 * MIN_BLOCK_SIZE), 3);
    assert_eq!(bucket(1295 * MIN_BLOCK_SIZE), 3);
    assert_eq!(bucket(1296 * MIN_BLOCK_SIZE), 4);
    assert_eq!(bucket(usize::MAX), CLASS_COUNT - 1);
  }

  #[test]
  fn test_bucket_is_monotonic() {
    let mut last = 0;
    for size in (MIN_BLOCK_SIZE..2000 * MIN_BLOCK_SIZE).step_by(8) {
      let class = bucket(size);
      assert!(class >= last, "bucket({size}) = {class} < {last}");
      assert!(class < CLASS_COUNT);
      last = class;
    }
  }
}
