#![no_std]

//! cmpool: a three-tier concurrent pool allocator.
//!
//! Small allocations flow through a per-thread cache (no locks on a hit), a
//! central cache of per-size-class locked free lists, and a page cache that
//! fronts the OS with split/coalesce span management. Requests above the
//! small-object boundary map pages directly.
//!
//! # Usage
//!
//! ```ignore
//! #[global_allocator]
//! static GLOBAL: cmpool::CmPool = cmpool::CmPool;
//! ```
//!
//! The crate is also usable without installing it globally, through
//! [`allocate`] / [`deallocate`]. Deallocation is sized: the caller passes
//! the size it allocated with, and that size selects the free list.

#[cfg(test)]
extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

/// Bump a statistics counter: `stat!(alloc_count)` adds one,
/// `stat!(alloc_bytes, n)` adds `n`. Expands to nothing unless the crate is
/// built with the `stats` feature, so hot paths carry no cost without it.
#[macro_export]
macro_rules! stat {
    ($counter:ident) => {
        $crate::stat!($counter, 1);
    };
    ($counter:ident, $amount:expr) => {
        #[cfg(feature = "stats")]
        {
            $crate::stats::STATS
                .$counter
                .fetch_add($amount as u64, ::core::sync::atomic::Ordering::Relaxed);
        }
    };
}

pub mod allocator;
pub mod central_cache;
pub mod config;
pub mod page_cache;
pub mod pagemap;
pub mod platform;
pub mod size_class;
pub mod span;
pub mod span_registry;
#[cfg(feature = "stats")]
pub mod stats;
pub mod sync;
pub mod thread_cache;

pub use allocator::{CmPool, allocate, deallocate};
#[cfg(feature = "std")]
pub use allocator::flush_thread_cache;
