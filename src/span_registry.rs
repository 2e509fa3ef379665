//! Span registry: the shared directory answering "which span owns this
//! block?", plus the per-span carve bookkeeping the central cache needs to
//! decide when a span can go back upstream.
//!
//! A fixed array of records with atomic fields. Registration publishes the
//! record by storing `start` last with release ordering, so a record whose
//! `start` holds a real address always has consistent fields. Retirement
//! clears `start` first; a retired slot can be re-claimed by a later
//! registration via CAS. Lookup is a linear scan over the occupied prefix —
//! a known scalability bound, paid O(S) per probe.

use crate::config::{MAX_SPAN_SLOTS, PAGE_SIZE};
use core::sync::atomic::{AtomicUsize, Ordering};

/// `start` value of a slot that has never been used or has been retired.
const EMPTY: usize = 0;
/// `start` value of a slot a writer has claimed but not yet published.
const CLAIMED: usize = 1;

/// One tracked span. `block_count` and `free_count` are only mutated under
/// the central-cache lock of the span's size class; `start` and `pages` are
/// frozen from publication until retirement.
pub struct SpanRecord {
    start: AtomicUsize,
    pages: AtomicUsize,
    block_count: AtomicUsize,
    free_count: AtomicUsize,
}

impl SpanRecord {
    const fn new() -> Self {
        Self {
            start: AtomicUsize::new(EMPTY),
            pages: AtomicUsize::new(0),
            block_count: AtomicUsize::new(0),
            free_count: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn start(&self) -> usize {
        self.start.load(Ordering::Acquire)
    }

    #[inline]
    pub fn pages(&self) -> usize {
        self.pages.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.block_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn free_count(&self) -> usize {
        self.free_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn inc_free(&self) {
        self.free_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn dec_free(&self) {
        self.free_count.fetch_sub(1, Ordering::Relaxed);
    }

    /// All carved blocks are free, i.e. every block of this span sits in
    /// the central free list.
    #[inline]
    pub fn is_fully_free(&self) -> bool {
        self.free_count() >= self.block_count()
    }
}

pub struct SpanRegistry {
    records: [SpanRecord; MAX_SPAN_SLOTS],
    /// High-water mark of ever-used slots; retired slots below it are
    /// re-claimable.
    occupied: AtomicUsize,
}

impl Default for SpanRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SpanRegistry {
    pub const fn new() -> Self {
        Self {
            records: [const { SpanRecord::new() }; MAX_SPAN_SLOTS],
            occupied: AtomicUsize::new(0),
        }
    }

    /// Track a span carved into `block_count` blocks, `free_count` of which
    /// remain in the central free list. Returns `None` when every slot is
    /// live — the caller must refuse the allocation, not drop the record.
    pub fn register(
        &self,
        start: usize,
        pages: usize,
        block_count: usize,
        free_count: usize,
    ) -> Option<&SpanRecord> {
        debug_assert!(start > CLAIMED && start % PAGE_SIZE == 0);

        // Retired slots first: CAS the EMPTY sentinel to claim. The plain
        // load keeps the scan read-only until a candidate shows up.
        let seen = self.occupied.load(Ordering::Acquire);
        for record in &self.records[..seen] {
            if record.start.load(Ordering::Relaxed) == EMPTY
                && record
                    .start
                    .compare_exchange(EMPTY, CLAIMED, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                return Some(Self::publish(record, start, pages, block_count, free_count));
            }
        }

        // Fresh slot. The index reservation and the claim are separate
        // steps; if a concurrent recycler snatches the reserved slot, the
        // slot is still in use, so just reserve the next one.
        loop {
            let n = self.occupied.load(Ordering::Relaxed);
            if n >= MAX_SPAN_SLOTS {
                return None;
            }
            if self
                .occupied
                .compare_exchange(n, n + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }
            if self.records[n]
                .start
                .compare_exchange(EMPTY, CLAIMED, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(Self::publish(
                    &self.records[n],
                    start,
                    pages,
                    block_count,
                    free_count,
                ));
            }
        }
    }

    fn publish<'a>(
        record: &'a SpanRecord,
        start: usize,
        pages: usize,
        block_count: usize,
        free_count: usize,
    ) -> &'a SpanRecord {
        record.pages.store(pages, Ordering::Relaxed);
        record.block_count.store(block_count, Ordering::Relaxed);
        record.free_count.store(free_count, Ordering::Relaxed);
        // Publication point: fields above become visible to any scanner
        // that observes this start value.
        record.start.store(start, Ordering::Release);
        record
    }

    /// Record owning `addr`, or `None`. O(occupied slots).
    pub fn find(&self, addr: usize) -> Option<&SpanRecord> {
        let seen = self.occupied.load(Ordering::Acquire);
        for record in &self.records[..seen] {
            let start = record.start.load(Ordering::Acquire);
            if start <= CLAIMED {
                continue;
            }
            let pages = record.pages.load(Ordering::Relaxed);
            if addr >= start && addr < start + pages * PAGE_SIZE {
                // A retire+re-register between the two start loads could
                // pair our start with foreign pages; a stable start means
                // the range we tested was real.
                if record.start.load(Ordering::Acquire) == start {
                    return Some(record);
                }
            }
        }
        None
    }

    /// Logically retire a record once its span went back to the page cache.
    /// The slot becomes claimable by future registrations.
    pub fn retire(&self, record: &SpanRecord) {
        // Clear start first so scanners stop matching before the counters
        // are wiped.
        record.start.store(EMPTY, Ordering::Release);
        record.free_count.store(0, Ordering::Relaxed);
        record.block_count.store(0, Ordering::Relaxed);
        record.pages.store(0, Ordering::Relaxed);
    }

    /// High-water mark of slots ever used.
    pub fn occupied(&self) -> usize {
        self.occupied.load(Ordering::Acquire)
    }

    /// Number of currently live (published) records.
    pub fn live(&self) -> usize {
        let seen = self.occupied.load(Ordering::Acquire);
        self.records[..seen]
            .iter()
            .filter(|r| r.start.load(Ordering::Acquire) > CLAIMED)
            .count()
    }
}
