//! Size class mapping.
//!
//! Classes are linear: class `i` holds blocks of `(i + 1) * ALIGNMENT`
//! bytes, so the byte→class mapping is pure arithmetic with no table. The
//! batch size for thread-cache refills shrinks as blocks grow, keeping each
//! transfer at roughly 2 KiB.

use crate::config::{ALIGNMENT, FREE_LIST_NUM, MAX_SMALL};

/// Round a request up to the next multiple of [`ALIGNMENT`].
#[inline(always)]
pub const fn round_up(bytes: usize) -> usize {
    (bytes + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Size class index for a request of `bytes`. Zero-byte requests map to
/// class 0 (the minimum block). Only valid for `bytes <= MAX_SMALL`.
#[inline(always)]
pub const fn class_of(bytes: usize) -> usize {
    let bytes = if bytes < ALIGNMENT { ALIGNMENT } else { bytes };
    (bytes + ALIGNMENT - 1) / ALIGNMENT - 1
}

/// Block size of a size class.
#[inline(always)]
pub const fn class_to_size(class: usize) -> usize {
    (class + 1) * ALIGNMENT
}

/// How many blocks a thread cache fetches from the central cache at once.
/// Tuned so a batch moves about 2 KiB regardless of block size.
#[inline]
pub const fn batch_num(block_size: usize) -> usize {
    match block_size {
        ..=32 => 64,
        ..=64 => 32,
        ..=128 => 16,
        ..=256 => 8,
        ..=512 => 4,
        ..=1024 => 2,
        _ => 1,
    }
}

const _: () = assert!(class_of(MAX_SMALL) == FREE_LIST_NUM - 1);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_multiples() {
        assert_eq!(round_up(0), 0);
        assert_eq!(round_up(1), 8);
        assert_eq!(round_up(8), 8);
        assert_eq!(round_up(9), 16);
        assert_eq!(round_up(255), 256);
        assert_eq!(round_up(MAX_SMALL), MAX_SMALL);
    }

    #[test]
    fn zero_maps_to_minimum_class() {
        assert_eq!(class_of(0), 0);
        assert_eq!(class_to_size(class_of(0)), ALIGNMENT);
    }

    #[test]
    fn exact_sizes_round_trip() {
        for class in [0, 1, 31, 63, 1023, FREE_LIST_NUM - 1] {
            let size = class_to_size(class);
            assert_eq!(class_of(size), class, "class {class} (size {size})");
        }
    }

    #[test]
    fn requests_round_up_within_class() {
        assert_eq!(class_of(1), 0);
        assert_eq!(class_of(7), 0);
        assert_eq!(class_of(9), 1);
        assert_eq!(class_of(16), 1);
        assert_eq!(class_of(17), 2);
        assert_eq!(class_to_size(class_of(100)), round_up(100));
        assert_eq!(class_to_size(class_of(MAX_SMALL - 3)), MAX_SMALL);
    }

    #[test]
    fn top_class_covers_max_small() {
        assert_eq!(class_of(MAX_SMALL), FREE_LIST_NUM - 1);
        assert_eq!(class_to_size(FREE_LIST_NUM - 1), MAX_SMALL);
    }

    #[test]
    fn batch_transfers_stay_near_two_kib() {
        assert_eq!(batch_num(8), 64);
        assert_eq!(batch_num(32), 64);
        assert_eq!(batch_num(40), 32);
        assert_eq!(batch_num(64), 32);
        assert_eq!(batch_num(128), 16);
        assert_eq!(batch_num(256), 8);
        assert_eq!(batch_num(512), 4);
        assert_eq!(batch_num(1024), 2);
        assert_eq!(batch_num(2048), 1);
        assert_eq!(batch_num(MAX_SMALL), 1);
    }
}
