//! Miri shim backed by the global allocator.
//!
//! Miri cannot execute mmap/VirtualAlloc, so page runs come from
//! `alloc_zeroed` instead. This keeps every unsafe pointer manipulation in
//! the allocator checkable with `cargo miri test`.

extern crate alloc;

use core::alloc::Layout;

use crate::config::PAGE_SIZE;

pub unsafe fn page_alloc(size: usize) -> *mut u8 {
    unsafe { page_alloc_aligned(size, PAGE_SIZE) }
}

pub unsafe fn page_alloc_aligned(size: usize, align: usize) -> *mut u8 {
    let Ok(layout) = Layout::from_size_align(size, align) else {
        return core::ptr::null_mut();
    };
    unsafe { alloc::alloc::alloc_zeroed(layout) }
}

pub unsafe fn page_dealloc(ptr: *mut u8, size: usize) {
    unsafe { page_dealloc_aligned(ptr, size, PAGE_SIZE) };
}

pub unsafe fn page_dealloc_aligned(ptr: *mut u8, size: usize, align: usize) {
    // Miri insists the deallocation layout match the allocation exactly.
    let layout = Layout::from_size_align(size, align).unwrap();
    unsafe { alloc::alloc::dealloc(ptr, layout) };
}

pub fn monotonic_millis() -> u64 {
    // No host clock under isolation; the delayed sweep still triggers via
    // its return counter.
    0
}
