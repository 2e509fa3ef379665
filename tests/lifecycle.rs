//! Tier-transition accounting: batched refills, whole-span return through
//! the delayed sweep, and the large path's bypass of the caches.
//!
//! These tests read the global counters, so they serialize on one gate and
//! each works a size class of its own. No global allocator is installed
//! here: the only pool traffic is what the tests issue themselves.

#![cfg(all(feature = "stats", feature = "std"))]

use cmpool::config::{MAX_DELAY_COUNT, MAX_SMALL, PAGE_SIZE, SPAN_PAGES};
use cmpool::stats;
use cmpool::{allocate, deallocate, flush_thread_cache};
use std::sync::Mutex;

static GATE: Mutex<()> = Mutex::new(());

#[test]
fn batched_fill_amortizes_the_tiers() {
    let _gate = GATE.lock().unwrap();

    // Fresh thread, fresh thread cache: 200 8-byte allocations must cost
    // one central fetch per 64-block batch and a single span overall.
    std::thread::spawn(|| {
        let before = stats::snapshot();

        let ptrs: Vec<usize> = (0..200).map(|_| allocate(8) as usize).collect();
        assert!(ptrs.iter().all(|&p| p != 0));

        let after = stats::snapshot();
        assert_eq!(after.thread_cache_misses - before.thread_cache_misses, 4);
        assert_eq!(after.central_fetches - before.central_fetches, 4);
        assert_eq!(after.spans_carved - before.spans_carved, 1);
        assert_eq!(after.span_allocs - before.span_allocs, 1);
        // At most one OS acquisition; zero when the page cache already
        // holds a reusable run from an earlier test in this process.
        assert!(after.os_alloc_count - before.os_alloc_count <= 1);

        for &p in &ptrs {
            unsafe { deallocate(p as *mut u8, 8) };
        }
    })
    .join()
    .unwrap();
}

#[test]
fn sweep_hands_a_fully_free_span_upstream() {
    let _gate = GATE.lock().unwrap();

    let before = stats::snapshot();
    let live_before = cmpool::allocator::live_span_records();

    std::thread::spawn(move || {
        // Drain one whole 16-byte span into this thread, then free it all.
        let total = SPAN_PAGES * PAGE_SIZE / 16;
        let ptrs: Vec<usize> = (0..total).map(|_| allocate(16) as usize).collect();
        assert!(ptrs.iter().all(|&p| p != 0));
        for &p in &ptrs {
            unsafe { deallocate(p as *mut u8, 16) };
        }
        flush_thread_cache();

        // Every block of the span is now back in the central list. Keep
        // issuing return events until the sweep counter trips and the span
        // goes back to the page cache.
        let mut returned = false;
        for _ in 0..=MAX_DELAY_COUNT {
            let p = allocate(16);
            assert!(!p.is_null());
            unsafe { deallocate(p, 16) };
            flush_thread_cache();
            if stats::snapshot().spans_returned > before.spans_returned {
                returned = true;
                break;
            }
        }
        assert!(returned, "delayed sweep never returned the span");
    })
    .join()
    .unwrap();

    let after = stats::snapshot();
    assert!(after.spans_returned >= before.spans_returned + 1);
    assert!(after.delayed_sweeps > before.delayed_sweeps);
    // At most one OS acquisition for the whole exercise, and the record
    // retired.
    assert!(after.os_alloc_count - before.os_alloc_count <= 1);
    assert_eq!(cmpool::allocator::live_span_records(), live_before);

    // The returned run sits in the page cache; the next burst reuses it
    // without touching the OS.
    std::thread::spawn(|| {
        let p = allocate(16);
        assert!(!p.is_null());
        unsafe { deallocate(p, 16) };
    })
    .join()
    .unwrap();
    let reused = stats::snapshot();
    assert_eq!(reused.os_alloc_count, after.os_alloc_count);
}

#[test]
fn large_path_bypasses_every_tier() {
    let _gate = GATE.lock().unwrap();

    let size = MAX_SMALL + 1;
    let before = stats::snapshot();

    let p = allocate(size);
    assert!(!p.is_null());
    let mid = stats::snapshot();
    assert_eq!(mid.large_allocs - before.large_allocs, 1);
    assert_eq!(mid.central_fetches, before.central_fetches);
    assert_eq!(mid.span_allocs, before.span_allocs);

    unsafe { deallocate(p, size) };
    let after = stats::snapshot();
    assert_eq!(after.large_frees - before.large_frees, 1);
    assert_eq!(after.central_returns, before.central_returns);
}
