//! Allocation statistics counters.
//!
//! All counters use `Relaxed` ordering — they are observational only and
//! never used for synchronization; the allocator's locks provide the real
//! ordering guarantees. Individual loads are atomic but a [`Snapshot`] is
//! not globally consistent, which is always sufficient for monitoring.
//!
//! Compiled in only with the `stats` feature; the `stat!` call sites
//! elsewhere vanish without it.

use core::sync::atomic::{AtomicU64, Ordering};

pub(crate) struct Stats {
    // ---- API surface ----
    /// Calls to allocate (after the zero-size guard).
    pub alloc_count: AtomicU64,
    /// Calls to deallocate.
    pub dealloc_count: AtomicU64,
    /// Calls to realloc through the GlobalAlloc facade.
    pub realloc_count: AtomicU64,
    /// Sum of requested sizes passed to allocate.
    pub alloc_bytes: AtomicU64,

    // ---- Tier traffic ----
    /// Thread-cache misses, i.e. batch refills from the central cache.
    pub thread_cache_misses: AtomicU64,
    /// Central cache fetch_range calls.
    pub central_fetches: AtomicU64,
    /// Central cache return_range calls.
    pub central_returns: AtomicU64,
    /// Delayed sweeps executed.
    pub delayed_sweeps: AtomicU64,
    /// Spans carved into blocks by the central cache.
    pub spans_carved: AtomicU64,
    /// Fully-free spans handed back to the page cache by sweeps.
    pub spans_returned: AtomicU64,

    // ---- Page cache / OS ----
    /// Page cache allocate_span calls.
    pub span_allocs: AtomicU64,
    /// Spans split while satisfying a smaller request.
    pub span_splits: AtomicU64,
    /// Adjacent free spans merged on return.
    pub span_coalesces: AtomicU64,
    /// Page runs obtained from the OS.
    pub os_alloc_count: AtomicU64,
    /// Bytes obtained from the OS.
    pub os_alloc_bytes: AtomicU64,

    // ---- Large path ----
    /// Requests above MAX_SMALL mapped straight from the OS.
    pub large_allocs: AtomicU64,
    /// Large mappings released back to the OS.
    pub large_frees: AtomicU64,
}

impl Stats {
    const fn new() -> Self {
        Self {
            alloc_count: AtomicU64::new(0),
            dealloc_count: AtomicU64::new(0),
            realloc_count: AtomicU64::new(0),
            alloc_bytes: AtomicU64::new(0),
            thread_cache_misses: AtomicU64::new(0),
            central_fetches: AtomicU64::new(0),
            central_returns: AtomicU64::new(0),
            delayed_sweeps: AtomicU64::new(0),
            spans_carved: AtomicU64::new(0),
            spans_returned: AtomicU64::new(0),
            span_allocs: AtomicU64::new(0),
            span_splits: AtomicU64::new(0),
            span_coalesces: AtomicU64::new(0),
            os_alloc_count: AtomicU64::new(0),
            os_alloc_bytes: AtomicU64::new(0),
            large_allocs: AtomicU64::new(0),
            large_frees: AtomicU64::new(0),
        }
    }
}

pub(crate) static STATS: Stats = Stats::new();

/// A point-in-time copy of every counter. Obtain with [`snapshot()`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Snapshot {
    pub alloc_count: u64,
    pub dealloc_count: u64,
    pub realloc_count: u64,
    pub alloc_bytes: u64,
    pub thread_cache_misses: u64,
    pub central_fetches: u64,
    pub central_returns: u64,
    pub delayed_sweeps: u64,
    pub spans_carved: u64,
    pub spans_returned: u64,
    pub span_allocs: u64,
    pub span_splits: u64,
    pub span_coalesces: u64,
    pub os_alloc_count: u64,
    pub os_alloc_bytes: u64,
    pub large_allocs: u64,
    pub large_frees: u64,
}

/// Load every counter with `Relaxed` ordering.
pub fn snapshot() -> Snapshot {
    let s = &STATS;
    Snapshot {
        alloc_count: s.alloc_count.load(Ordering::Relaxed),
        dealloc_count: s.dealloc_count.load(Ordering::Relaxed),
        realloc_count: s.realloc_count.load(Ordering::Relaxed),
        alloc_bytes: s.alloc_bytes.load(Ordering::Relaxed),
        thread_cache_misses: s.thread_cache_misses.load(Ordering::Relaxed),
        central_fetches: s.central_fetches.load(Ordering::Relaxed),
        central_returns: s.central_returns.load(Ordering::Relaxed),
        delayed_sweeps: s.delayed_sweeps.load(Ordering::Relaxed),
        spans_carved: s.spans_carved.load(Ordering::Relaxed),
        spans_returned: s.spans_returned.load(Ordering::Relaxed),
        span_allocs: s.span_allocs.load(Ordering::Relaxed),
        span_splits: s.span_splits.load(Ordering::Relaxed),
        span_coalesces: s.span_coalesces.load(Ordering::Relaxed),
        os_alloc_count: s.os_alloc_count.load(Ordering::Relaxed),
        os_alloc_bytes: s.os_alloc_bytes.load(Ordering::Relaxed),
        large_allocs: s.large_allocs.load(Ordering::Relaxed),
        large_frees: s.large_frees.load(Ordering::Relaxed),
    }
}
