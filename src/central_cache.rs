//! Central cache (middle tier): one locked free list of equal-sized blocks
//! per size class.
//!
//! Thread caches pull batches out with `fetch_range` and push batches back
//! with `return_range`. A miss carves a fresh span from the page cache into
//! blocks; returns are counted and periodically swept, and any span whose
//! blocks are all back in the list is excised wholesale and handed upstream.
//!
//! Classes are independent: each has its own test-and-set lock, and all
//! state for a class is only touched with that lock held. The page cache
//! mutex nests inside a class lock, never the other way around.

use crate::config::{FREE_LIST_NUM, MAX_DELAY_COUNT, MAX_DELAY_INTERVAL_MS, PAGE_SIZE, SPAN_PAGES};
use crate::page_cache::PageCache;
use crate::platform;
use crate::size_class;
use crate::span::FreeBlock;
use crate::span_registry::{SpanRecord, SpanRegistry};
use crate::stat;
use crate::sync::{SpinLock, SpinMutex};
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use log::{error, warn};

/// Fully-free spans handed upstream per sweep; the rest wait for the next
/// sweep. Sized for classes near the span size, where every span carves
/// into only a handful of blocks and free spans pile up quickly.
const MAX_SWEEP_SPANS: usize = 32;

/// Per-size-class state. The atomics are only written under `lock`; they
/// are atomic so the struct stays const-constructible in a static and the
/// head can be read by diagnostics without tearing.
struct CentralFreeList {
    head: AtomicPtr<FreeBlock>,
    lock: SpinLock,
    /// Returns since the last sweep.
    delay_count: AtomicUsize,
    /// Monotonic timestamp of the last sweep.
    last_sweep_ms: AtomicU64,
}

impl CentralFreeList {
    const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            lock: SpinLock::new(),
            delay_count: AtomicUsize::new(0),
            last_sweep_ms: AtomicU64::new(0),
        }
    }
}

pub struct CentralCache {
    lists: [CentralFreeList; FREE_LIST_NUM],
}

// SAFETY: every list mutation happens under that list's lock; the block
// pointers reference OS-backed memory independent of any thread lifetime.
unsafe impl Send for CentralCache {}
unsafe impl Sync for CentralCache {}

impl Default for CentralCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CentralCache {
    pub const fn new() -> Self {
        Self {
            lists: [const { CentralFreeList::new() }; FREE_LIST_NUM],
        }
    }

    /// Detach up to `batch` blocks of `class` as a null-terminated chain.
    /// Returns `(count, head)`; `(0, null)` on an invalid class or when the
    /// page cache cannot supply a span.
    ///
    /// Never hands out blocks it does not hold: an empty list is refilled
    /// by carving a whole span before anything is returned.
    ///
    /// # Safety
    ///
    /// `page_cache` and `registry` must be the instances every other call
    /// for this class uses.
    pub unsafe fn fetch_range(
        &self,
        class: usize,
        batch: usize,
        page_cache: &SpinMutex<PageCache>,
        registry: &SpanRegistry,
    ) -> (usize, *mut FreeBlock) {
        if class >= FREE_LIST_NUM || batch == 0 {
            return (0, ptr::null_mut());
        }
        stat!(central_fetches);

        let list = &self.lists[class];
        list.lock.lock();

        let head = list.head.load(Ordering::Relaxed);
        let result = if !head.is_null() {
            unsafe { Self::take_from_list(list, head, batch, registry) }
        } else {
            unsafe { self.refill_and_take(list, class, batch, page_cache, registry) }
        };

        list.lock.unlock();
        result
    }

    /// Walk up to `batch` blocks from the list head, crediting each block's
    /// span for the departure, and detach them.
    unsafe fn take_from_list(
        list: &CentralFreeList,
        head: *mut FreeBlock,
        batch: usize,
        registry: &SpanRegistry,
    ) -> (usize, *mut FreeBlock) {
        let mut taken = 0;
        let mut last: *mut FreeBlock = ptr::null_mut();
        let mut current = head;

        while !current.is_null() && taken < batch {
            match registry.find(current as usize) {
                Some(record) => record.dec_free(),
                None => error!("block {current:p} has no registry record"),
            }
            last = current;
            current = unsafe { (*current).next };
            taken += 1;
        }

        unsafe { (*last).next = ptr::null_mut() };
        list.head.store(current, Ordering::Relaxed);
        (taken, head)
    }

    /// The list is empty: obtain a span from the page cache, carve it into
    /// blocks of this class, keep the surplus, and return the batch.
    unsafe fn refill_and_take(
        &self,
        list: &CentralFreeList,
        class: usize,
        batch: usize,
        page_cache: &SpinMutex<PageCache>,
        registry: &SpanRegistry,
    ) -> (usize, *mut FreeBlock) {
        let block_size = size_class::class_to_size(class);
        let pages = SPAN_PAGES.max(block_size.div_ceil(PAGE_SIZE));

        let start = unsafe { page_cache.lock().allocate_span(pages) };
        if start.is_null() {
            return (0, ptr::null_mut());
        }

        let total = pages * PAGE_SIZE / block_size;
        let take = batch.min(total);

        // Chain the handed-out prefix and the retained remainder.
        let block_at = |i: usize| unsafe { start.add(i * block_size) as *mut FreeBlock };
        for i in 0..take - 1 {
            unsafe { (*block_at(i)).next = block_at(i + 1) };
        }
        unsafe { (*block_at(take - 1)).next = ptr::null_mut() };

        let remainder = if total > take {
            for i in take..total - 1 {
                unsafe { (*block_at(i)).next = block_at(i + 1) };
            }
            unsafe { (*block_at(total - 1)).next = ptr::null_mut() };
            block_at(take)
        } else {
            ptr::null_mut()
        };

        // Publish the record before any block of the span becomes visible;
        // a full registry refuses the whole refill rather than losing track
        // of the span.
        if registry
            .register(start as usize, pages, total, total - take)
            .is_none()
        {
            warn!("span registry full; refusing refill for class {class}");
            unsafe { page_cache.lock().deallocate_span(start, pages) };
            return (0, ptr::null_mut());
        }
        stat!(spans_carved);

        list.head.store(remainder, Ordering::Relaxed);
        (take, block_at(0))
    }

    /// Accept a chain of blocks of `class` covering `total_bytes`, splice it
    /// onto the free list, and credit each block's span. Every
    /// `MAX_DELAY_COUNT` returns — or after `MAX_DELAY_INTERVAL_MS` of wall
    /// time, whichever comes first — fully-free spans are swept upstream.
    ///
    /// # Safety
    ///
    /// `head` must be a chain of at least `total_bytes / block_size` blocks
    /// previously fetched for `class`, none of which are otherwise reachable.
    pub unsafe fn return_range(
        &self,
        head: *mut FreeBlock,
        total_bytes: usize,
        class: usize,
        page_cache: &SpinMutex<PageCache>,
        registry: &SpanRegistry,
    ) {
        if head.is_null() || class >= FREE_LIST_NUM {
            return;
        }
        let block_size = size_class::class_to_size(class);
        let expected = total_bytes / block_size;
        if expected == 0 {
            return;
        }
        stat!(central_returns);

        let list = &self.lists[class];
        list.lock.lock();

        // Credit spans while walking to the tail. The chain is trusted only
        // as far as it actually reaches: a short chain just returns fewer
        // blocks.
        let mut credit = |block: *mut FreeBlock| match registry.find(block as usize) {
            Some(record) => record.inc_free(),
            None => error!("returned block {block:p} has no registry record"),
        };

        let mut tail = head;
        let mut count = 1;
        credit(head);
        while count < expected {
            let next = unsafe { (*tail).next };
            if next.is_null() {
                break;
            }
            tail = next;
            credit(tail);
            count += 1;
        }

        unsafe { (*tail).next = list.head.load(Ordering::Relaxed) };
        list.head.store(head, Ordering::Relaxed);

        let returns = list.delay_count.fetch_add(1, Ordering::Relaxed) + 1;
        let now = platform::monotonic_millis();
        let elapsed = now.saturating_sub(list.last_sweep_ms.load(Ordering::Relaxed));
        if returns >= MAX_DELAY_COUNT || elapsed >= MAX_DELAY_INTERVAL_MS {
            unsafe { self.sweep_class(list, page_cache, registry, now) };
        }

        list.lock.unlock();
    }

    /// Walk the class list once, group blocks by owning span, and hand every
    /// fully-free span back to the page cache. Called with the class lock
    /// held; at that point all blocks of a fully-free span are in this list,
    /// so nothing else can hold a pointer into the span.
    unsafe fn sweep_class(
        &self,
        list: &CentralFreeList,
        page_cache: &SpinMutex<PageCache>,
        registry: &SpanRegistry,
        now: u64,
    ) {
        list.delay_count.store(0, Ordering::Relaxed);
        list.last_sweep_ms.store(now, Ordering::Relaxed);
        stat!(delayed_sweeps);

        // Collect distinct fully-free spans.
        let mut full: [*const SpanRecord; MAX_SWEEP_SPANS] = [ptr::null(); MAX_SWEEP_SPANS];
        let mut found = 0;
        let mut current = list.head.load(Ordering::Relaxed);
        while !current.is_null() && found < MAX_SWEEP_SPANS {
            if let Some(record) = registry.find(current as usize) {
                let key = record as *const SpanRecord;
                if record.is_fully_free() && !full[..found].contains(&key) {
                    full[found] = key;
                    found += 1;
                }
            }
            current = unsafe { (*current).next };
        }

        for &record_ptr in &full[..found] {
            let record = unsafe { &*record_ptr };
            let start = record.start();
            let pages = record.pages();
            let lo = start;
            let hi = start + pages * PAGE_SIZE;

            // Excise every block whose address lies in the span, rewriting
            // the head unconditionally at the end.
            let mut head = list.head.load(Ordering::Relaxed);
            let mut prev: *mut FreeBlock = ptr::null_mut();
            let mut current = head;
            let mut excised = 0usize;
            while !current.is_null() {
                let next = unsafe { (*current).next };
                let addr = current as usize;
                if addr >= lo && addr < hi {
                    if prev.is_null() {
                        head = next;
                    } else {
                        unsafe { (*prev).next = next };
                    }
                    excised += 1;
                } else {
                    prev = current;
                }
                current = next;
            }
            list.head.store(head, Ordering::Relaxed);
            debug_assert_eq!(excised, record.block_count());

            // Retire before the pages can be re-carved: a fresh span in the
            // same range must never resolve to this stale record.
            registry.retire(record);
            unsafe { page_cache.lock().deallocate_span(start as *mut u8, pages) };
            stat!(spans_returned);
        }
    }

    /// Length of the class free list, walked under the lock. Panics if the
    /// walk exceeds a generous bound, which would mean the chain has a
    /// cycle.
    #[cfg(feature = "stats")]
    pub fn list_len(&self, class: usize) -> usize {
        const WALK_BOUND: usize = 1 << 26;
        let list = &self.lists[class];
        list.lock.lock();
        let mut len = 0;
        let mut current = list.head.load(Ordering::Relaxed);
        while !current.is_null() {
            len += 1;
            if len > WALK_BOUND {
                list.lock.unlock();
                panic!("central free list for class {class} does not terminate");
            }
            current = unsafe { (*current).next };
        }
        list.lock.unlock();
        len
    }
}
