//! Page cache (back end): owns every contiguous page run and fronts the OS.
//!
//! Free spans sit in per-page-count buckets (runs above `MAX_PAGES` go to an
//! overflow list searched best-fit). Allocation takes the smallest free run
//! that fits, splitting off the high-address tail; a miss grows the heap by
//! exactly the requested run. Deallocation coalesces forward with a free
//! successor. Spans are retained for reuse, never returned to the OS.
//!
//! All state is guarded by one mutex: the enclosing `SpinMutex` in the
//! allocator facade.

use crate::config::{MAX_PAGES, PAGE_SHIFT, PAGE_SIZE};
use crate::pagemap::PageMap;
use crate::platform;
use crate::span::{self, Span, SpanList, SpanState};
use crate::stat;
use core::ptr;
use log::error;

pub struct PageCache {
    /// free_by_pages[k] holds free spans of exactly k pages (index 0 unused).
    free_by_pages: [SpanList; MAX_PAGES + 1],
    /// Free spans larger than MAX_PAGES pages, searched best-fit.
    overflow: SpanList,
    /// Start-address directory over every span this cache tracks.
    pagemap: &'static PageMap,
}

// SAFETY: only accessed through a SpinMutex; the raw pointers reference
// OS-allocated memory that outlives any thread.
unsafe impl Send for PageCache {}

impl PageCache {
    pub const fn new(pagemap: &'static PageMap) -> Self {
        Self {
            free_by_pages: [const { SpanList::new() }; MAX_PAGES + 1],
            overflow: SpanList::new(),
            pagemap,
        }
    }

    /// Allocate a run of exactly `num_pages` pages. Returns the page-aligned
    /// start address, or null when the OS refuses memory.
    ///
    /// # Safety
    ///
    /// Caller must hold exclusive access (the enclosing `SpinMutex`).
    pub unsafe fn allocate_span(&mut self, num_pages: usize) -> *mut u8 {
        assert!(num_pages > 0);
        stat!(span_allocs);

        // Smallest bucket that fits, low page counts first.
        if num_pages <= MAX_PAGES {
            for n in num_pages..=MAX_PAGES {
                if !self.free_by_pages[n].is_empty() {
                    let found = unsafe { self.free_by_pages[n].pop() };
                    return unsafe { self.carve(found, num_pages) };
                }
            }
        }

        let best = self.best_fit_overflow(num_pages);
        if !best.is_null() {
            unsafe { self.overflow.remove(best) };
            return unsafe { self.carve(best, num_pages) };
        }

        unsafe { self.grow(num_pages) }
    }

    /// Return a span previously handed out by [`allocate_span`].
    ///
    /// A start address this cache does not know is logged and ignored; a
    /// known span with a mismatched page count or already-free state is a
    /// broken invariant and fatal.
    ///
    /// # Safety
    ///
    /// Caller must hold exclusive access (the enclosing `SpinMutex`), and
    /// no pointer into the span may remain in any free list or caller hand.
    pub unsafe fn deallocate_span(&mut self, start: *mut u8, num_pages: usize) {
        let span = self.pagemap.get(start as usize >> PAGE_SHIFT);
        if span.is_null() {
            error!("deallocate_span: {start:p} is not a tracked span start");
            return;
        }

        unsafe {
            assert!(
                (*span).state == SpanState::InUse,
                "span at {start:p} returned twice"
            );
            assert!(
                (*span).num_pages == num_pages,
                "span at {start:p} returned with {num_pages} pages, tracked as {}",
                (*span).num_pages
            );
            (*span).state = SpanState::Free;

            let merged = self.absorb_successor(span);
            self.insert_free(merged);
        }
    }

    /// Keep the low `num_pages` pages of `found` and hand them out; the
    /// remainder becomes a new free span. Retaining the low half keeps the
    /// handed-out span's successor probe cheap on return.
    unsafe fn carve(&mut self, found: *mut Span, num_pages: usize) -> *mut u8 {
        let total = unsafe { (*found).num_pages };
        assert!(total >= num_pages);

        if total > num_pages {
            let tail = span::alloc_span();
            if tail.is_null() {
                // No node for the remainder. Handing out the oversized run
                // would break the caller's page-count bookkeeping, so put
                // the run back and report failure.
                unsafe { self.insert_free(found) };
                return ptr::null_mut();
            }

            stat!(span_splits);
            unsafe {
                (*tail).start_page = (*found).start_page + num_pages;
                (*tail).num_pages = total - num_pages;
                (*tail).state = SpanState::Free;
                (*found).num_pages = num_pages;

                self.pagemap.register(tail);
                self.insert_free(tail);
            }
        }

        unsafe {
            (*found).state = SpanState::InUse;
            (*found).start_addr()
        }
    }

    unsafe fn insert_free(&mut self, span: *mut Span) {
        let n = unsafe { (*span).num_pages };
        if n <= MAX_PAGES {
            unsafe { self.free_by_pages[n].push(span) };
        } else {
            unsafe { self.overflow.push(span) };
        }
    }

    fn best_fit_overflow(&self, num_pages: usize) -> *mut Span {
        let mut best: *mut Span = ptr::null_mut();
        let mut best_pages = usize::MAX;
        let mut current = self.overflow.head;

        while !current.is_null() {
            let n = unsafe { (*current).num_pages };
            if n >= num_pages && n < best_pages {
                best = current;
                best_pages = n;
                if n == num_pages {
                    break;
                }
            }
            current = unsafe { (*current).next };
        }
        best
    }

    /// Obtain exactly `num_pages` fresh pages from the OS.
    unsafe fn grow(&mut self, num_pages: usize) -> *mut u8 {
        let size = num_pages * PAGE_SIZE;
        let mem = unsafe { platform::page_alloc(size) };
        if mem.is_null() {
            return ptr::null_mut();
        }
        stat!(os_alloc_count);
        stat!(os_alloc_bytes, size);

        let span = span::alloc_span();
        if span.is_null() {
            unsafe { platform::page_dealloc(mem, size) };
            return ptr::null_mut();
        }

        unsafe {
            (*span).start_page = mem as usize >> PAGE_SHIFT;
            (*span).num_pages = num_pages;
            (*span).state = SpanState::InUse;
            self.pagemap.register(span);
        }
        mem
    }

    /// Merge `span` with the free span starting right after it, if any.
    /// Backward coalescing is intentionally absent; splits keep the
    /// low-address half in use, so forward merging alone reassembles runs.
    unsafe fn absorb_successor(&mut self, span: *mut Span) -> *mut Span {
        let end_page = unsafe { (*span).end_page() };
        let next = self.pagemap.get(end_page);
        if next.is_null() {
            return span;
        }

        unsafe {
            if (*next).state != SpanState::Free || (*next).start_page != end_page {
                return span;
            }

            stat!(span_coalesces);
            let next_pages = (*next).num_pages;
            if next_pages <= MAX_PAGES {
                self.free_by_pages[next_pages].remove(next);
            } else {
                self.overflow.remove(next);
            }
            self.pagemap.unregister(next);
            (*span).num_pages += next_pages;
            span::dealloc_span(next);
        }
        span
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use alloc::vec::Vec;

    fn make_cache() -> (&'static PageMap, PageCache) {
        let pm = Box::leak(Box::new(PageMap::new()));
        let cache = PageCache::new(pm);
        (pm, cache)
    }

    #[test]
    fn allocate_and_reuse() {
        let (pm, mut pc) = make_cache();
        unsafe {
            let a = pc.allocate_span(8);
            assert!(!a.is_null());
            assert_eq!(a as usize % PAGE_SIZE, 0);

            let tracked = pm.get(a as usize >> PAGE_SHIFT);
            assert!(!tracked.is_null());
            assert_eq!((*tracked).num_pages, 8);
            assert_eq!((*tracked).state, SpanState::InUse);

            pc.deallocate_span(a, 8);

            // Same run comes back from the bucket, no new OS mapping.
            let b = pc.allocate_span(8);
            assert_eq!(a, b);
            pc.deallocate_span(b, 8);
        }
    }

    #[test]
    fn split_keeps_low_half_and_recombines() {
        let (_pm, mut pc) = make_cache();
        unsafe {
            let a = pc.allocate_span(8);
            pc.deallocate_span(a, 8);

            // 3 pages out of the free 8: low half handed out, 5-page tail
            // stays free.
            let low = pc.allocate_span(3);
            assert_eq!(low, a);
            let tail = pc.allocate_span(5);
            assert_eq!(tail as usize, a as usize + 3 * PAGE_SIZE);

            // Frees in address order: the 3-run absorbs the free 5-run.
            pc.deallocate_span(tail, 5);
            pc.deallocate_span(low, 3);

            let whole = pc.allocate_span(8);
            assert_eq!(whole, a);
            pc.deallocate_span(whole, 8);
        }
    }

    #[test]
    fn forward_coalesce_restores_full_run() {
        let (pm, mut pc) = make_cache();
        unsafe {
            let a = pc.allocate_span(4);
            pc.deallocate_span(a, 4);

            let first = pc.allocate_span(1);
            assert_eq!(first, a);
            // Remaining 3 pages are free; returning the 1-page run must
            // merge forward into a single 4-page span.
            pc.deallocate_span(first, 1);

            let whole = pc.allocate_span(4);
            assert_eq!(whole, a);
            let tracked = pm.get(whole as usize >> PAGE_SHIFT);
            assert_eq!((*tracked).num_pages, 4);
            pc.deallocate_span(whole, 4);
        }
    }

    #[test]
    fn unknown_start_is_ignored() {
        let (_pm, mut pc) = make_cache();
        unsafe {
            // An address never handed out: logged and dropped, no panic.
            pc.deallocate_span(0x1000 as *mut u8, 1);
        }
    }

    #[test]
    fn many_runs_round_trip() {
        let (_pm, mut pc) = make_cache();
        let mut runs = Vec::new();
        unsafe {
            for i in 1..=40 {
                let pages = 1 + (i % 7);
                let p = pc.allocate_span(pages);
                assert!(!p.is_null());
                runs.push((p, pages));
            }
            for (p, pages) in runs {
                pc.deallocate_span(p, pages);
            }
        }
    }
}
