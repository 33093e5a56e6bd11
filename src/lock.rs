//! Cooperative single-owner lock.
//!
//! The UHF driver owns one byte stream that multiple sub-tasks (carrier
//! sense, send, receive-interruption) take turns driving. `original_source`
//! wraps the stream in a templated `nb::Lock<reference_wrapper<RW>>` so a
//! sub-task can acquire a `LockGuard` and hold it across several polls,
//! releasing it on drop. The teacher crate instead reaches for
//! `embassy_sync::mutex::Mutex`, an async-await mutex that needs a waker and
//! an executor to resolve contested locks — incompatible with this crate's
//! single-threaded, waker-free re-poll model (§4.1/§5).
//!
//! This is a from-scratch, `no_std` reimplementation of the cooperative
//! lock: `poll_lock` never blocks, returns `Pending` if already held, and a
//! held [`LockGuard`] can be moved into a task's state and kept across
//! polls until dropped. The guard stores a raw pointer rather than a
//! borrowed reference (the same trade the teacher makes in `frame_pool.rs`'s
//! `NonNull<RawFrame>`), so it can live inside a sibling field of the same
//! struct that owns the `Lock` without running into Rust's single-borrow
//! rule for self-referential state machines.
//!
//! # Safety
//!
//! A [`Lock`] must not move for as long as any [`LockGuard`] derived from it
//! is alive. In practice the lock is a field of a driver that is placed
//! once (as a `static`, or owned by the top-level scheduler loop and never
//! relocated) before polling begins.

use core::cell::{Cell, UnsafeCell};
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;

use crate::poll::Poll;

pub struct Lock<T> {
    value: UnsafeCell<T>,
    locked: Cell<bool>,
}

// SAFETY: this crate's scheduling model is single-threaded (§5); a `Lock`
// is only ever touched from that one thread of execution, so there is no
// real cross-thread race for `Sync` to protect against. This impl exists
// only so a `Lock<T>` can sit in a `'static` without a runtime-initialized
// wrapper, matching how the teacher's `FrameStorage` statics work.
unsafe impl<T: Send> Sync for Lock<T> {}

impl<T> Lock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
            locked: Cell::new(false),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.get()
    }

    /// Attempts to acquire the lock. `Pending` if already held by another
    /// outstanding guard.
    pub fn poll_lock(&self) -> Poll<LockGuard<T>> {
        if self.locked.replace(true) {
            Poll::Pending
        } else {
            Poll::Ready(LockGuard {
                ptr: NonNull::from(self),
            })
        }
    }
}

/// Proof of exclusive, cooperative access to a [`Lock`]'s contents.
///
/// Releases the lock when dropped.
pub struct LockGuard<T> {
    ptr: NonNull<Lock<T>>,
}

impl<T> Deref for LockGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: holding a LockGuard proves `locked` is set, so no other
        // guard exists; the referenced Lock outlives us per the type's
        // safety contract.
        unsafe { &*self.ptr.as_ref().value.get() }
    }
}

impl<T> DerefMut for LockGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see Deref::deref.
        unsafe { &mut *self.ptr.as_ref().value.get() }
    }
}

impl<T> Drop for LockGuard<T> {
    fn drop(&mut self) {
        // SAFETY: the referenced Lock outlives us per the type's safety
        // contract.
        unsafe {
            self.ptr.as_ref().locked.set(false);
        }
    }
}
