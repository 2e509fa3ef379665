//! Windows backend: VirtualAlloc/VirtualFree.
//!
//! VirtualAlloc regions start on a 64 KiB boundary, which already covers any
//! supported PAGE_SIZE; stronger alignments use a reserve/probe/commit cycle.

use core::ffi::c_void;
use core::ptr;

const MEM_COMMIT: u32 = 0x1000;
const MEM_RESERVE: u32 = 0x2000;
const MEM_RELEASE: u32 = 0x8000;
const PAGE_READWRITE: u32 = 0x04;

unsafe extern "system" {
    #[link_name = "VirtualAlloc"]
    fn virtual_alloc(
        lp_address: *mut c_void,
        dw_size: usize,
        fl_allocation_type: u32,
        fl_protect: u32,
    ) -> *mut c_void;

    #[link_name = "VirtualFree"]
    fn virtual_free(lp_address: *mut c_void, dw_size: usize, dw_free_type: u32) -> i32;

    #[link_name = "GetTickCount64"]
    fn get_tick_count64() -> u64;
}

pub unsafe fn page_alloc(size: usize) -> *mut u8 {
    let ptr = unsafe {
        virtual_alloc(
            ptr::null_mut(),
            size,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_READWRITE,
        )
    };
    ptr as *mut u8
}

pub unsafe fn page_alloc_aligned(size: usize, align: usize) -> *mut u8 {
    // Reserve an oversized region to learn an aligned address inside it,
    // release it, then commit exactly at that address. Another thread can
    // take the spot between the two calls, so retry a bounded number of
    // times before reporting failure.
    for _ in 0..8 {
        let probe = unsafe {
            virtual_alloc(ptr::null_mut(), size + align, MEM_RESERVE, PAGE_READWRITE)
        };
        if probe.is_null() {
            return ptr::null_mut();
        }
        let aligned = (probe as usize + align - 1) & !(align - 1);
        unsafe { virtual_free(probe, 0, MEM_RELEASE) };

        let ptr = unsafe {
            virtual_alloc(
                aligned as *mut c_void,
                size,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_READWRITE,
            )
        };
        if !ptr.is_null() {
            return ptr as *mut u8;
        }
    }
    ptr::null_mut()
}

pub unsafe fn page_dealloc(ptr: *mut u8, _size: usize) {
    // MEM_RELEASE frees the whole region and requires dwSize = 0.
    unsafe { virtual_free(ptr as *mut c_void, 0, MEM_RELEASE) };
}

pub unsafe fn page_dealloc_aligned(ptr: *mut u8, _size: usize, _align: usize) {
    // The aligned path committed at the returned base, so ptr is the region
    // base VirtualFree expects.
    unsafe { virtual_free(ptr as *mut c_void, 0, MEM_RELEASE) };
}

pub fn monotonic_millis() -> u64 {
    unsafe { get_tick_count64() }
}
