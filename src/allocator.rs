//! Top-level allocator: ties the tiers together and implements GlobalAlloc.
//!
//! All shared state lives in const-initialized statics, so there is no
//! runtime initialization to order. Small requests (≤ `MAX_SMALL`) go
//! through the thread cache when the `std` feature provides TLS, and fall
//! through to the central cache otherwise; larger requests map pages
//! straight from the OS and hand them straight back on free, bypassing
//! every tier.

use crate::central_cache::CentralCache;
use crate::config::{ALIGNMENT, MAX_SMALL, PAGE_SIZE};
use crate::page_cache::PageCache;
use crate::pagemap::PageMap;
use crate::platform;
use crate::size_class;
use crate::span::FreeBlock;
use crate::span_registry::SpanRegistry;
use crate::sync::SpinMutex;
use crate::stat;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

pub(crate) static PAGE_MAP: PageMap = PageMap::new();
pub(crate) static PAGE_CACHE: SpinMutex<PageCache> = SpinMutex::new(PageCache::new(&PAGE_MAP));
pub(crate) static SPAN_REGISTRY: SpanRegistry = SpanRegistry::new();
pub(crate) static CENTRAL_CACHE: CentralCache = CentralCache::new();

/// Where a (size, align) request is served. Computed identically on the
/// allocation and deallocation sides — this is a sized-deallocation
/// allocator, so the route must be a pure function of the layout.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Route {
    Small(usize),
    Large,
}

fn route(size: usize, align: usize) -> Route {
    if size > MAX_SMALL {
        return Route::Large;
    }
    if align <= ALIGNMENT {
        return Route::Small(size_class::class_of(size));
    }
    if align > PAGE_SIZE {
        return Route::Large;
    }
    // Over-aligned small request: serviceable from a class whose block size
    // is a multiple of the alignment, since spans start page-aligned and
    // blocks are laid out back to back.
    let class = size_class::class_of(size.max(align));
    if size_class::class_to_size(class) % align == 0 {
        Route::Small(class)
    } else {
        Route::Large
    }
}

/// Allocate `size` bytes aligned to [`ALIGNMENT`]. A zero `size` is served
/// as the minimum block. Returns null when the OS refuses memory.
pub fn allocate(size: usize) -> *mut u8 {
    do_allocate(size, ALIGNMENT)
}

/// Release a block from [`allocate`].
///
/// # Safety
///
/// `ptr` must come from [`allocate`] with this exact `size`, and must not
/// be used afterwards. Passing a different size is undefined behavior — the
/// size is what selects the free list.
pub unsafe fn deallocate(ptr: *mut u8, size: usize) {
    unsafe { do_deallocate(ptr, size, ALIGNMENT) }
}

fn do_allocate(size: usize, align: usize) -> *mut u8 {
    stat!(alloc_count);
    stat!(alloc_bytes, size);

    match route(size, align) {
        Route::Small(class) => alloc_small(class),
        Route::Large => large_alloc(size, align),
    }
}

unsafe fn do_deallocate(ptr: *mut u8, size: usize, align: usize) {
    if ptr.is_null() {
        return;
    }
    stat!(dealloc_count);

    match route(size, align) {
        Route::Small(class) => unsafe { dealloc_small(ptr, class) },
        Route::Large => unsafe { large_dealloc(ptr, size, align) },
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        use core::cell::UnsafeCell;
        use crate::thread_cache::ThreadCache;

        /// TLS slot wrapper whose destructor drains the cache into the
        /// central tier, so a dying thread leaks nothing.
        struct TcSlot(UnsafeCell<ThreadCache>);

        impl Drop for TcSlot {
            fn drop(&mut self) {
                unsafe {
                    (*self.0.get()).drain(&CENTRAL_CACHE, &PAGE_CACHE, &SPAN_REGISTRY);
                }
            }
        }

        std::thread_local! {
            static TC_SLOT: TcSlot = const { TcSlot(UnsafeCell::new(ThreadCache::new())) };
        }

        #[inline]
        fn alloc_small(class: usize) -> *mut u8 {
            // try_with fails during thread teardown, after the slot's
            // destructor ran; those stragglers go to the central cache.
            TC_SLOT
                .try_with(|slot| unsafe {
                    (*slot.0.get()).allocate(class, &CENTRAL_CACHE, &PAGE_CACHE, &SPAN_REGISTRY)
                })
                .unwrap_or_else(|_| alloc_from_central(class))
        }

        #[inline]
        unsafe fn dealloc_small(ptr: *mut u8, class: usize) {
            if TC_SLOT
                .try_with(|slot| unsafe {
                    (*slot.0.get()).deallocate(
                        ptr,
                        class,
                        &CENTRAL_CACHE,
                        &PAGE_CACHE,
                        &SPAN_REGISTRY,
                    )
                })
                .is_err()
            {
                unsafe { dealloc_to_central(ptr, class) };
            }
        }

        /// Drain the calling thread's cache into the central tier. Useful
        /// before a thread goes idle for a long time; the cache refills
        /// transparently on the next allocation.
        pub fn flush_thread_cache() {
            let _ = TC_SLOT.try_with(|slot| unsafe {
                (*slot.0.get()).drain(&CENTRAL_CACHE, &PAGE_CACHE, &SPAN_REGISTRY);
            });
        }
    } else {
        #[inline]
        fn alloc_small(class: usize) -> *mut u8 {
            alloc_from_central(class)
        }

        #[inline]
        unsafe fn dealloc_small(ptr: *mut u8, class: usize) {
            unsafe { dealloc_to_central(ptr, class) };
        }
    }
}

fn alloc_from_central(class: usize) -> *mut u8 {
    let (count, head) =
        unsafe { CENTRAL_CACHE.fetch_range(class, 1, &PAGE_CACHE, &SPAN_REGISTRY) };
    if count == 0 {
        ptr::null_mut()
    } else {
        head as *mut u8
    }
}

unsafe fn dealloc_to_central(ptr: *mut u8, class: usize) {
    let block = ptr as *mut FreeBlock;
    unsafe {
        (*block).next = ptr::null_mut();
        CENTRAL_CACHE.return_range(
            block,
            size_class::class_to_size(class),
            class,
            &PAGE_CACHE,
            &SPAN_REGISTRY,
        );
    }
}

#[inline]
fn large_map_size(size: usize) -> usize {
    size.div_ceil(PAGE_SIZE) * PAGE_SIZE
}

fn large_alloc(size: usize, align: usize) -> *mut u8 {
    stat!(large_allocs);
    let map_size = large_map_size(size);
    if align <= PAGE_SIZE {
        unsafe { platform::page_alloc(map_size) }
    } else {
        unsafe { platform::page_alloc_aligned(map_size, align) }
    }
}

unsafe fn large_dealloc(ptr: *mut u8, size: usize, align: usize) {
    stat!(large_frees);
    let map_size = large_map_size(size);
    if align <= PAGE_SIZE {
        unsafe { platform::page_dealloc(ptr, map_size) };
    } else {
        unsafe { platform::page_dealloc_aligned(ptr, map_size, align) };
    }
}

/// Length of the central free list for `class`, walked under its lock.
/// Panics if the walk does not terminate. Diagnostic only.
#[cfg(feature = "stats")]
pub fn central_list_len(class: usize) -> usize {
    CENTRAL_CACHE.list_len(class)
}

/// Span records currently live in the registry. Diagnostic only.
#[cfg(feature = "stats")]
pub fn live_span_records() -> usize {
    SPAN_REGISTRY.live()
}

/// Three-tier pool allocator.
///
/// Install as the global allocator with:
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: cmpool::CmPool = cmpool::CmPool;
/// ```
pub struct CmPool;

unsafe impl GlobalAlloc for CmPool {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.size() == 0 {
            return layout.align() as *mut u8;
        }
        do_allocate(layout.size(), layout.align())
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        unsafe { do_deallocate(ptr, layout.size(), layout.align()) };
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.alloc(layout) };
        // Recycled blocks carry stale bytes; fresh OS pages are already
        // zero, but the route is not visible here, so always clear.
        if !ptr.is_null() && layout.size() > 0 {
            unsafe { ptr::write_bytes(ptr, 0, layout.size()) };
        }
        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if ptr.is_null() || layout.size() == 0 {
            let new_layout =
                unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
            return unsafe { self.alloc(new_layout) };
        }
        if new_size == 0 {
            unsafe { self.dealloc(ptr, layout) };
            return layout.align() as *mut u8;
        }

        stat!(realloc_count);

        // Stay in place only when the new layout routes to the very same
        // storage: the next dealloc will be sized with new_size, so the
        // routes must agree exactly.
        let align = layout.align();
        let old_route = route(layout.size(), align);
        let new_route = route(new_size, align);
        let in_place = match (old_route, new_route) {
            (Route::Small(a), Route::Small(b)) => a == b,
            (Route::Large, Route::Large) => {
                large_map_size(layout.size()) == large_map_size(new_size)
            }
            _ => false,
        };
        if in_place {
            return ptr;
        }

        let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, align) };
        let new_ptr = unsafe { self.alloc(new_layout) };
        if !new_ptr.is_null() {
            unsafe {
                ptr::copy_nonoverlapping(ptr, new_ptr, layout.size().min(new_size));
                self.dealloc(ptr, layout);
            }
        }
        new_ptr
    }
}
