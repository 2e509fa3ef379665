//! Compile-time configuration.
//!
//! The tunable constants are generated by `build.rs` from `cmpool.toml`
//! (or the file named by the `CMPOOL_CONFIG` environment variable) and
//! included here; the derived constants follow.

include!(concat!(env!("OUT_DIR"), "/config_gen.rs"));

/// Base alignment of every block. Fixed at one machine word: a free block
/// stores its next pointer in its first word.
pub const ALIGNMENT: usize = 8;

/// Number of size classes. Class `i` holds blocks of `(i + 1) * ALIGNMENT`
/// bytes, covering requests from 1 byte up to `MAX_SMALL`.
pub const FREE_LIST_NUM: usize = MAX_SMALL / ALIGNMENT;

const _: () = assert!(ALIGNMENT >= core::mem::size_of::<usize>());
const _: () = assert!(PAGE_SIZE == 1 << PAGE_SHIFT);
const _: () = assert!(MAX_SMALL % ALIGNMENT == 0);
const _: () = assert!(SPAN_PAGES * PAGE_SIZE >= ALIGNMENT);
