//! Alignment behavior through the GlobalAlloc facade, from byte-aligned
//! layouts up to alignments beyond the page size.

use cmpool::CmPool;
use cmpool::config::PAGE_SIZE;
use std::alloc::{GlobalAlloc, Layout};

static POOL: CmPool = CmPool;

fn check(size: usize, align: usize, fill: u8) {
    let layout = Layout::from_size_align(size, align).unwrap();
    let ptr = unsafe { POOL.alloc(layout) };
    assert!(!ptr.is_null(), "alloc failed: size={size}, align={align}");
    assert_eq!(
        ptr as usize % align,
        0,
        "misaligned: ptr={ptr:?}, size={size}, align={align}"
    );
    unsafe {
        ptr.write_bytes(fill, size);
        for i in 0..size {
            assert_eq!(*ptr.add(i), fill, "size={size}, align={align}, byte {i}");
        }
        POOL.dealloc(ptr, layout);
    }
}

#[test]
fn word_and_smaller_alignments() {
    for align in [1, 2, 4, 8] {
        for size in [1, 7, 8, 15, 16, 31, 64, 255, 256, 1024, 4096] {
            if size < align {
                continue;
            }
            check(size, align, 0xAB);
        }
    }
}

#[test]
fn over_aligned_16() {
    for size in [16, 32, 64, 128, 256, 1024] {
        check(size, 16, 0xCD);
    }
}

#[test]
fn over_aligned_64() {
    for size in [64, 128, 256, 512, 1024, 4096] {
        check(size, 64, 0x42);
    }
}

#[test]
fn over_aligned_256() {
    for size in [256, 512, 1024, 4096, 8192] {
        check(size, 256, 0x99);
    }
}

#[test]
fn non_divisible_sizes_still_align() {
    // Sizes that no class serves at this alignment take the large path.
    check(24, 16, 0x31);
    check(40, 32, 0x32);
    check(200, 128, 0x33);
}

#[test]
fn page_alignment() {
    for size in [PAGE_SIZE, PAGE_SIZE * 2, PAGE_SIZE * 16] {
        check(size, PAGE_SIZE, 0xAA);
    }
}

#[test]
fn above_page_alignment() {
    for align in [2 * PAGE_SIZE, 4 * PAGE_SIZE, 16 * PAGE_SIZE] {
        for size in [align, align * 2] {
            check(size, align, 0xBE);
        }
    }
}

#[test]
fn many_over_aligned_allocations() {
    let align = 64;
    let size = 64;
    let layout = Layout::from_size_align(size, align).unwrap();
    let count = 500;

    let mut ptrs = Vec::with_capacity(count);
    for _ in 0..count {
        let ptr = unsafe { POOL.alloc(layout) };
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % align, 0);
        unsafe { ptr.write_bytes(0xDD, size) };
        ptrs.push(ptr);
    }
    for &ptr in &ptrs {
        for i in 0..size {
            assert_eq!(unsafe { *ptr.add(i) }, 0xDD);
        }
    }
    for ptr in ptrs {
        unsafe { POOL.dealloc(ptr, layout) };
    }
}

#[test]
fn zero_size_layout_is_harmless() {
    let layout = Layout::from_size_align(0, 16).unwrap();
    let ptr = unsafe { POOL.alloc(layout) };
    assert!(!ptr.is_null());
    assert_eq!(ptr as usize % 16, 0);
    unsafe { POOL.dealloc(ptr, layout) };
}

#[test]
fn realloc_keeps_alignment() {
    for align in [16, 32, 64, 256] {
        let size = align * 2;
        let layout = Layout::from_size_align(size, align).unwrap();
        let ptr = unsafe { POOL.alloc(layout) };
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % align, 0);

        unsafe { ptr.write_bytes(0xBB, size) };
        let new_size = size * 4;
        let new_ptr = unsafe { POOL.realloc(ptr, layout, new_size) };
        assert!(!new_ptr.is_null(), "realloc failed: align={align}");
        assert_eq!(new_ptr as usize % align, 0, "realloc lost alignment");
        for i in 0..size {
            assert_eq!(unsafe { *new_ptr.add(i) }, 0xBB, "byte {i} lost");
        }

        let new_layout = Layout::from_size_align(new_size, align).unwrap();
        unsafe { POOL.dealloc(new_ptr, new_layout) };
    }
}
