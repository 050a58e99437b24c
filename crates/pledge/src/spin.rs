//! Busy-wait lock for critical sections that last a handful of instructions.
//!
//! The lock is NOT reentrant: calling [`SpinLock::lock`] while already holding
//! a guard on the same lock spins forever. The guard is the only way to reach
//! the protected data and it cannot be cloned, so holding the lock is always
//! tied to exactly one owner. Never run user callbacks or anything that can
//! block while a guard is alive.

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

/// Default number of exponential spin rounds before yielding the thread.
pub const DEFAULT_SPIN_LIMIT: u32 = 6;

pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    spin_limit: u32,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized through `locked`; a guard only exists
// while the flag is held, so `T: Send` is enough to share the lock.
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self::with_spin_limit(value, DEFAULT_SPIN_LIMIT)
    }

    pub const fn with_spin_limit(value: T, spin_limit: u32) -> Self {
        Self {
            locked: AtomicBool::new(false),
            spin_limit,
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Single non-blocking acquisition attempt.
    pub fn try_lock(&self) -> Option<SpinGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinGuard { lock: self })
    }

    /// Spin until the lock is acquired.
    pub fn lock(&self) -> SpinGuard<'_, T> {
        let mut backoff = Backoff::new(self.spin_limit);
        loop {
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return SpinGuard { lock: self };
            }
            // Wait on a plain load so contended spinning does not keep
            // bouncing the cache line between writers.
            while self.locked.load(Ordering::Relaxed) {
                backoff.snooze();
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Exclusive access without locking; `&mut self` proves nobody holds a guard.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// Proof of holding a [`SpinLock`]. Dropping it releases the lock.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SpinGuard<'a, T: ?Sized> {
    lock: &'a SpinLock<T>,
}

impl<T: ?Sized> SpinGuard<'_, T> {
    /// Release the lock explicitly.
    pub fn unlock(self) {
        drop(self);
    }
}

impl<T: ?Sized> Deref for SpinGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard owns the lock flag for its whole lifetime.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard owns the lock flag and is not clonable.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// Exponential busy-wait that degrades to yielding the thread.
struct Backoff {
    step: u32,
    limit: u32,
}

impl Backoff {
    fn new(limit: u32) -> Self {
        Self { step: 0, limit }
    }

    fn snooze(&mut self) {
        if self.step <= self.limit {
            for _ in 0..1u32 << self.step.min(10) {
                std::hint::spin_loop();
            }
            self.step += 1;
        } else {
            std::thread::yield_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new(0u32);
        let guard = lock.try_lock().expect("uncontended lock");
        assert!(lock.is_locked());
        assert!(lock.try_lock().is_none());
        guard.unlock();
        assert!(!lock.is_locked());
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn guard_gives_mutable_access() {
        let lock = SpinLock::new(vec![1, 2]);
        lock.lock().push(3);
        assert_eq!(*lock.lock(), vec![1, 2, 3]);
        assert_eq!(lock.into_inner(), vec![1, 2, 3]);
    }

    #[test]
    fn get_mut_bypasses_lock() {
        let mut lock = SpinLock::new(5);
        *lock.get_mut() += 1;
        assert_eq!(*lock.lock(), 6);
    }

    #[test]
    fn mutual_exclusion_under_contention() {
        let lock = SpinLock::with_spin_limit(0usize, 2);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..10_000 {
                        // Non-atomic read-modify-write; only correct if exclusive.
                        let mut guard = lock.lock();
                        let v = *guard;
                        *guard = v + 1;
                    }
                });
            }
        });
        assert_eq!(*lock.lock(), 80_000);
    }

    #[test]
    fn debug_reports_lock_state() {
        let lock = SpinLock::new(());
        let _guard = lock.lock();
        assert!(format!("{lock:?}").contains("locked: true"));
    }
}
