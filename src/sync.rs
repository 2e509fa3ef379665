//! Locking primitives used throughout the allocator.
//!
//! `std::sync::Mutex` may allocate on first contention, which would recurse
//! into the allocator being built, so every lock here is a test-and-set
//! spinlock. Waiters yield the CPU between acquisition attempts when the
//! scheduler is available, and fall back to the spin-wait hint otherwise.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// Give up the rest of the time slice while waiting for a lock.
#[inline]
fn relax() {
    cfg_if::cfg_if! {
        if #[cfg(any(test, feature = "std"))] {
            std::thread::yield_now();
        } else {
            core::hint::spin_loop();
        }
    }
}

/// A test-and-set spinlock with explicit `lock`/`unlock`.
///
/// Used raw (no guard) where the critical section has early-out failure
/// paths that must release before propagating.
pub struct SpinLock {
    held: AtomicBool,
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }

    /// Spin until the flag is won. The inner wait loop only reads, so
    /// contending cores share the line until the holder's release
    /// invalidates it.
    #[inline]
    pub fn lock(&self) {
        while self.held.swap(true, Ordering::Acquire) {
            while self.held.load(Ordering::Relaxed) {
                relax();
            }
        }
    }

    /// One attempt, no waiting.
    #[inline]
    pub fn try_lock(&self) -> bool {
        !self.held.swap(true, Ordering::Acquire)
    }

    #[inline]
    pub fn unlock(&self) {
        self.held.store(false, Ordering::Release);
    }
}

/// A value guarded by a [`SpinLock`], unlocked on guard drop.
/// Const-constructible, so it can live in a `static`.
pub struct SpinMutex<T> {
    lock: SpinLock,
    value: UnsafeCell<T>,
}

impl<T> SpinMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            lock: SpinLock::new(),
            value: UnsafeCell::new(value),
        }
    }

    #[inline]
    pub fn lock(&self) -> SpinMutexGuard<'_, T> {
        self.lock.lock();
        SpinMutexGuard {
            lock: &self.lock,
            value: self.value.get(),
        }
    }
}

unsafe impl<T: Send> Send for SpinMutex<T> {}
unsafe impl<T: Send> Sync for SpinMutex<T> {}

/// Exclusive view of the value in a [`SpinMutex`]; holding it is holding
/// the lock.
pub struct SpinMutexGuard<'a, T> {
    lock: &'a SpinLock,
    value: *mut T,
}

impl<T> Deref for SpinMutexGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.value }
    }
}

impl<T> DerefMut for SpinMutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.value }
    }
}

impl<T> Drop for SpinMutexGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
