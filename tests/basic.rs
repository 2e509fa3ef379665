//! End-to-end behavior of the sized allocate/deallocate API: minimum
//! requests, class boundaries, the large path, and the non-overlap and
//! round-trip guarantees.

use cmpool::config::{ALIGNMENT, FREE_LIST_NUM, MAX_SMALL};
use cmpool::size_class;
use cmpool::{allocate, deallocate};

#[test]
fn minimum_request_is_aligned_and_freeable() {
    let p = allocate(0);
    assert!(!p.is_null());
    assert_eq!(p as usize % 8, 0);
    unsafe {
        // The minimum block is a full 8 bytes.
        core::ptr::write_bytes(p, 0x11, 8);
        deallocate(p, 0);
    }
}

#[test]
fn boundary_classes_round_trip_patterns() {
    for class in [0, 1, 31, 63, FREE_LIST_NUM - 1] {
        let size = size_class::class_to_size(class);
        let p = allocate(size);
        assert!(!p.is_null(), "class {class}");
        assert_eq!(p as usize % ALIGNMENT, 0);

        unsafe {
            core::ptr::write_bytes(p, 0xA5, size);
            for i in 0..size {
                assert_eq!(*p.add(i), 0xA5, "class {class} byte {i}");
            }
            deallocate(p, size);
        }

        // Reallocation of the same size may reuse the block; either way the
        // fresh block must be fully writable.
        let q = allocate(size);
        assert!(!q.is_null());
        unsafe {
            core::ptr::write_bytes(q, 0x3C, size);
            assert_eq!(*q, 0x3C);
            assert_eq!(*q.add(size - 1), 0x3C);
            deallocate(q, size);
        }
    }
}

#[test]
fn requests_get_at_least_what_they_asked_for() {
    // Sub-class-size requests still own round_up(size) bytes.
    for size in [1, 7, 13, 100, 1000, 4097] {
        let p = allocate(size);
        assert!(!p.is_null());
        let usable = size_class::round_up(size);
        unsafe {
            core::ptr::write_bytes(p, 0x77, usable);
            assert_eq!(*p.add(usable - 1), 0x77);
            deallocate(p, size);
        }
    }
}

#[test]
fn large_path_serves_beyond_the_boundary() {
    for size in [MAX_SMALL + 1, MAX_SMALL * 2, MAX_SMALL * 4 + 12345] {
        let p = allocate(size);
        assert!(!p.is_null(), "size {size}");
        unsafe {
            *p = 0xEE;
            *p.add(size - 1) = 0xDD;
            assert_eq!(*p, 0xEE);
            assert_eq!(*p.add(size - 1), 0xDD);
            deallocate(p, size);
        }
    }
}

#[test]
fn live_blocks_never_overlap() {
    let sizes = [8usize, 24, 100, 512, 2048, 8192];
    let mut live: Vec<(usize, usize)> = Vec::new();

    for round in 0..4 {
        for &size in &sizes {
            for _ in 0..32 {
                let p = allocate(size);
                assert!(!p.is_null());
                live.push((p as usize, size));
            }
        }
        // Free every other allocation, keep the rest live across rounds.
        if round < 3 {
            let mut keep = Vec::new();
            for (i, (addr, size)) in live.drain(..).enumerate() {
                if i % 2 == 0 {
                    unsafe { deallocate(addr as *mut u8, size) };
                } else {
                    keep.push((addr, size));
                }
            }
            live = keep;
        }
    }

    let mut ranges: Vec<(usize, usize)> = live
        .iter()
        .map(|&(addr, size)| (addr, addr + size_class::round_up(size)))
        .collect();
    ranges.sort();
    for pair in ranges.windows(2) {
        assert!(
            pair[0].1 <= pair[1].0,
            "overlap: [{:#x}, {:#x}) and [{:#x}, {:#x})",
            pair[0].0,
            pair[0].1,
            pair[1].0,
            pair[1].1
        );
    }

    for (addr, size) in live {
        unsafe { deallocate(addr as *mut u8, size) };
    }
}

#[test]
fn distinct_patterns_survive_side_by_side() {
    // Neighboring blocks of one class must not bleed into each other.
    let size = 40;
    let count = 128;
    let mut blocks = Vec::new();

    for i in 0..count {
        let p = allocate(size);
        assert!(!p.is_null());
        unsafe { core::ptr::write_bytes(p, i as u8, size) };
        blocks.push(p);
    }
    for (i, &p) in blocks.iter().enumerate() {
        for j in 0..size {
            assert_eq!(unsafe { *p.add(j) }, i as u8, "block {i} byte {j}");
        }
    }
    for p in blocks {
        unsafe { deallocate(p, size) };
    }
}
