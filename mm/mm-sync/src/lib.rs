//! # Locking primitives for the memory managers
//!
//! Two kinds of locks back the allocators:
//!
//! - [`Mutex`] is the *blocking* lock seam. The region list and the heap's
//!   main free list sit behind one of these; a kernel integration plugs a
//!   scheduler-aware raw lock into the `R` parameter. The provided
//!   [`SpinMutex`] alias uses [`RawSpin`] and is what the hosted tests use.
//! - [`SpinLock`] is for contexts that must not block (the delayed-free
//!   producer side runs with interrupts off). Critical sections under it have
//!   to stay tiny.
//!
//! Both hand out RAII guards, so every exit path releases the lock,
//! early returns and unwinding test panics included.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod mutex;
mod raw_spin;
mod spin_lock;

pub use mutex::{Mutex, MutexGuard};
pub use raw_spin::RawSpin;
pub use spin_lock::{SpinLock, SpinLockGuard};

/// Acquire side of a raw lock.
pub trait RawLock {
    fn raw_lock(&self);
    fn raw_try_lock(&self) -> bool;
}

/// Release side of a raw lock.
pub trait RawUnlock {
    /// # Safety
    /// Must only be called by the holder of the lock.
    unsafe fn raw_unlock(&self);
}

/// A [`Mutex`] backed by a plain spin loop.
pub type SpinMutex<T> = Mutex<T, RawSpin>;

impl<T> SpinMutex<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawSpin::new(), value)
    }
}
