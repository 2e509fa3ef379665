//! Radix tree mapping page ids to span metadata.
//!
//! This is the page cache's address directory: every span it tracks — free
//! or handed out — is registered under its start page, so "does a span start
//! here?" is one lookup. Deallocation probes the exact start address it is
//! given, and forward coalescing probes the page just past a span's end;
//! interior pages are never queried and never registered.
//!
//! Three levels cover the 48-bit address space. The root is a static array;
//! mid and leaf nodes are whole pages lazily obtained from the OS. Reads are
//! lock-free (acquire loads); all writes happen under the page cache mutex.

use crate::config::{PAGE_SHIFT, PAGE_SIZE};
use crate::platform;
use crate::span::Span;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, Ordering};

const ADDRESS_BITS: usize = 48;

const MID_BITS: usize = 12;
const LEAF_BITS: usize = 11;
const ROOT_BITS: usize = ADDRESS_BITS - PAGE_SHIFT - MID_BITS - LEAF_BITS;

const ROOT_LEN: usize = 1 << ROOT_BITS;
const MID_LEN: usize = 1 << MID_BITS;
const LEAF_LEN: usize = 1 << LEAF_BITS;

#[repr(C)]
struct MidNode {
    children: [AtomicPtr<LeafNode>; MID_LEN],
}

#[repr(C)]
struct LeafNode {
    spans: [AtomicPtr<Span>; LEAF_LEN],
}

/// A page id split into its per-level indices.
struct Path {
    root: usize,
    mid: usize,
    leaf: usize,
}

impl Path {
    /// `None` when the page id lies beyond the covered address space.
    fn of(page_id: usize) -> Option<Self> {
        let root = page_id >> (MID_BITS + LEAF_BITS);
        (root < ROOT_LEN).then(|| Self {
            root,
            mid: (page_id >> LEAF_BITS) % MID_LEN,
            leaf: page_id % LEAF_LEN,
        })
    }
}

/// page id -> `*mut Span` lookup table.
pub struct PageMap {
    root: [AtomicPtr<MidNode>; ROOT_LEN],
}

unsafe impl Send for PageMap {}
unsafe impl Sync for PageMap {}

impl PageMap {
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            root: [const { AtomicPtr::new(ptr::null_mut()) }; ROOT_LEN],
        }
    }

    /// Span registered at `page_id`, or null.
    #[inline]
    pub fn get(&self, page_id: usize) -> *mut Span {
        let Some(at) = Path::of(page_id) else {
            return ptr::null_mut();
        };

        NonNull::new(self.root[at.root].load(Ordering::Acquire))
            .and_then(|mid| {
                NonNull::new(unsafe { mid.as_ref() }.children[at.mid].load(Ordering::Acquire))
            })
            .map(|leaf| unsafe { leaf.as_ref() }.spans[at.leaf].load(Ordering::Acquire))
            .unwrap_or(ptr::null_mut())
    }

    /// Map `page_id` to `span` (or clear with null).
    ///
    /// # Safety
    ///
    /// Must run under the page cache mutex; `span` must be valid or null.
    pub unsafe fn set(&self, page_id: usize, span: *mut Span) {
        let at = Path::of(page_id).expect("page id beyond the mapped address space");

        let mid = Self::node_or_grow(&self.root[at.root]);
        let leaf = Self::node_or_grow(unsafe { &(*mid).children[at.mid] });
        unsafe { (*leaf).spans[at.leaf].store(span, Ordering::Release) };
    }

    /// Register a span under its start page.
    ///
    /// # Safety
    ///
    /// Must run under the page cache mutex.
    pub unsafe fn register(&self, span: *mut Span) {
        unsafe { self.set((*span).start_page, span) };
    }

    /// Remove a span's start-page entry.
    ///
    /// # Safety
    ///
    /// Must run under the page cache mutex.
    pub unsafe fn unregister(&self, span: *mut Span) {
        unsafe { self.set((*span).start_page, ptr::null_mut()) };
    }

    /// Load a child node, allocating and publishing it when absent. Writers
    /// are serialized by the page cache mutex, so load-then-store cannot
    /// lose a node to a racing writer.
    fn node_or_grow<T>(slot: &AtomicPtr<T>) -> *mut T {
        let existing = slot.load(Ordering::Acquire);
        if !existing.is_null() {
            return existing;
        }

        let node_bytes = (core::mem::size_of::<T>() + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
        // A fresh page is zeroed, which is exactly an all-null node.
        let node = unsafe { platform::page_alloc(node_bytes) }.cast::<T>();
        assert!(!node.is_null(), "out of memory growing the page map");
        slot.store(node, Ordering::Release);
        node
    }
}
