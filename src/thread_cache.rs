//! Thread cache (front end): per-thread free lists, one per size class.
//!
//! The owning thread is the only toucher, so a hit costs a pointer read and
//! a store — no atomics, no locks. Misses pull a batch from the central
//! cache; a list that outgrows `THREAD_FREE_BLOCK_THRESHOLD` keeps a quarter
//! and pushes the rest back upstream in one call.

use crate::central_cache::CentralCache;
use crate::config::{FREE_LIST_NUM, THREAD_FREE_BLOCK_THRESHOLD};
use crate::page_cache::PageCache;
use crate::size_class;
use crate::span::FreeBlock;
use crate::span_registry::SpanRegistry;
use crate::stat;
use crate::sync::SpinMutex;
use core::ptr;

struct FreeList {
    head: *mut FreeBlock,
    count: usize,
}

impl FreeList {
    const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            count: 0,
        }
    }
}

pub struct ThreadCache {
    lists: [FreeList; FREE_LIST_NUM],
}

impl Default for ThreadCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadCache {
    pub const fn new() -> Self {
        Self {
            lists: [const { FreeList::new() }; FREE_LIST_NUM],
        }
    }

    /// Allocate one block of `class`. Null only when the refill fails all
    /// the way down (out of memory or registry refusal).
    ///
    /// # Safety
    ///
    /// `class` must be below `FREE_LIST_NUM`, and the collaborators must be
    /// the same instances every call on this cache uses.
    #[inline]
    pub unsafe fn allocate(
        &mut self,
        class: usize,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
        registry: &SpanRegistry,
    ) -> *mut u8 {
        let list = &mut self.lists[class];
        let block = list.head;
        if !block.is_null() {
            list.head = unsafe { (*block).next };
            list.count -= 1;
            return block as *mut u8;
        }
        unsafe { self.refill(class, central, page_cache, registry) }
    }

    /// Miss path: fetch a batch from the central cache, hand the first block
    /// to the caller and keep the rest.
    #[cold]
    unsafe fn refill(
        &mut self,
        class: usize,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
        registry: &SpanRegistry,
    ) -> *mut u8 {
        stat!(thread_cache_misses);

        let batch = size_class::batch_num(size_class::class_to_size(class));
        let (count, head) = unsafe { central.fetch_range(class, batch, page_cache, registry) };
        if count == 0 || head.is_null() {
            return ptr::null_mut();
        }

        let list = &mut self.lists[class];
        list.head = unsafe { (*head).next };
        list.count = count - 1;
        head as *mut u8
    }

    /// Return one block of `class` to this cache. Crossing
    /// `THREAD_FREE_BLOCK_THRESHOLD` keeps a quarter of the list and sends
    /// the remainder upstream as one chain.
    ///
    /// # Safety
    ///
    /// `ptr` must be a block of `class` previously allocated and not
    /// otherwise reachable; collaborator instances as for [`allocate`].
    #[inline]
    pub unsafe fn deallocate(
        &mut self,
        ptr: *mut u8,
        class: usize,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
        registry: &SpanRegistry,
    ) {
        let list = &mut self.lists[class];
        let block = ptr as *mut FreeBlock;
        unsafe { (*block).next = list.head };
        list.head = block;
        list.count += 1;

        if list.count > THREAD_FREE_BLOCK_THRESHOLD {
            unsafe { self.release_excess(class, central, page_cache, registry) };
        }
    }

    unsafe fn release_excess(
        &mut self,
        class: usize,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
        registry: &SpanRegistry,
    ) {
        let list = &mut self.lists[class];
        let keep = list.count / 4;

        // Walk to the last retained block. A chain shorter than the count
        // says means corrupted bookkeeping; resync to what was actually
        // observed and keep everything.
        let mut last_kept = list.head;
        let mut walked = 1;
        while walked < keep {
            let next = unsafe { (*last_kept).next };
            if next.is_null() {
                list.count = walked;
                return;
            }
            last_kept = next;
            walked += 1;
        }

        let detached = unsafe { (*last_kept).next };
        if detached.is_null() {
            list.count = walked;
            return;
        }
        unsafe { (*last_kept).next = ptr::null_mut() };

        let returned = list.count - keep;
        list.count = keep;

        let block_size = size_class::class_to_size(class);
        unsafe {
            central.return_range(detached, returned * block_size, class, page_cache, registry)
        };
    }

    /// Hand every cached block back to the central cache. Called when the
    /// owning thread exits, so nothing leaks into a dead thread's TLS.
    ///
    /// # Safety
    ///
    /// Collaborator instances as for [`allocate`]; no block from this cache
    /// may still be reachable elsewhere.
    pub unsafe fn drain(
        &mut self,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
        registry: &SpanRegistry,
    ) {
        for class in 0..FREE_LIST_NUM {
            let list = &mut self.lists[class];
            if list.head.is_null() {
                continue;
            }
            let head = list.head;
            let count = list.count;
            list.head = ptr::null_mut();
            list.count = 0;

            let block_size = size_class::class_to_size(class);
            unsafe { central.return_range(head, count * block_size, class, page_cache, registry) };
        }
    }

    /// Blocks currently cached for `class`.
    pub fn cached(&self, class: usize) -> usize {
        self.lists[class].count
    }
}
