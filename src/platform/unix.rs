//! Unix backend: anonymous mmap, with head/tail trimming when the requested
//! alignment exceeds what mmap guarantees (the system page size).

use crate::config::PAGE_SIZE;
use core::ffi::c_void;
use core::ptr;

unsafe fn mmap_anon(size: usize) -> *mut u8 {
    let raw = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if raw == libc::MAP_FAILED {
        ptr::null_mut()
    } else {
        raw as *mut u8
    }
}

pub unsafe fn page_alloc(size: usize) -> *mut u8 {
    // mmap only guarantees system-page alignment; a configured PAGE_SIZE
    // above that needs the aligned path. A direct hit avoids the extra
    // mapping and trim.
    let raw = unsafe { mmap_anon(size) };
    if raw.is_null() || raw as usize % PAGE_SIZE == 0 {
        return raw;
    }
    unsafe {
        libc::munmap(raw as *mut c_void, size);
        page_alloc_aligned(size, PAGE_SIZE)
    }
}

pub unsafe fn page_alloc_aligned(size: usize, align: usize) -> *mut u8 {
    let raw = unsafe { mmap_anon(size + align) };
    if raw.is_null() {
        return raw;
    }

    let raw_addr = raw as usize;
    let aligned_addr = (raw_addr + align - 1) & !(align - 1);

    // Unmap the leading and trailing waste so the live mapping is exactly
    // [aligned_addr, aligned_addr + size).
    let lead = aligned_addr - raw_addr;
    if lead > 0 {
        unsafe { libc::munmap(raw_addr as *mut c_void, lead) };
    }
    let trail = (raw_addr + size + align) - (aligned_addr + size);
    if trail > 0 {
        unsafe { libc::munmap((aligned_addr + size) as *mut c_void, trail) };
    }

    aligned_addr as *mut u8
}

pub unsafe fn page_dealloc(ptr: *mut u8, size: usize) {
    unsafe { libc::munmap(ptr as *mut c_void, size) };
}

pub unsafe fn page_dealloc_aligned(ptr: *mut u8, size: usize, _align: usize) {
    // The aligned path trimmed the mapping to exactly [ptr, ptr + size).
    unsafe { libc::munmap(ptr as *mut c_void, size) };
}

pub fn monotonic_millis() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return 0;
    }
    ts.tv_sec as u64 * 1000 + ts.tv_nsec as u64 / 1_000_000
}
