//! Spinning reader-writer lock with a bias counter.
//!
//! The counter starts at [`RW_LOCK_BIAS`] ("fully free"). A reader
//! subtracts 1 and succeeds iff the result is still non-negative; a writer
//! subtracts the whole bias and succeeds iff the result is exactly zero.
//! A failed attempt adds its amount back and spins on plain loads until the
//! counter looks favourable again, so contended CPUs don't bounce the cache
//! line with read-modify-writes.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

use super::loom_compat::{AtomicI32, Ordering, loom_const_fn, spin_loop};

/// Counter value of a free lock. Also the amount a writer subtracts.
pub const RW_LOCK_BIAS: i32 = 0x0100_0000;

/// A spinning reader-writer lock.
///
/// Any number of readers, or one writer. Writers get no preference over
/// readers; this is the lock for short, non-sleeping sections such as the
/// global task-list lock.
pub struct RwSpinLock<T: ?Sized> {
    count: AtomicI32,
    data: UnsafeCell<T>,
}

// SAFETY: The lock hands out either shared access (requiring `T: Sync`) or
// exclusive access (requiring `T: Send`).
unsafe impl<T: ?Sized + Send> Send for RwSpinLock<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for RwSpinLock<T> {}

impl<T> RwSpinLock<T> {
    loom_const_fn! {
        /// Creates a new unlocked `RwSpinLock` wrapping `value`.
        pub fn new(value: T) -> Self {
            Self {
                count: AtomicI32::new(RW_LOCK_BIAS),
                data: UnsafeCell::new(value),
            }
        }
    }
}

impl<T: ?Sized> RwSpinLock<T> {
    /// Acquires shared access, spinning while a writer holds the lock.
    pub fn read(&self) -> RwSpinLockReadGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_read() {
                return guard;
            }
            while self.count.load(Ordering::Relaxed) < 1 {
                spin_loop();
            }
        }
    }

    /// Acquires exclusive access, spinning until there are no readers or
    /// writers.
    pub fn write(&self) -> RwSpinLockWriteGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_write() {
                return guard;
            }
            while self.count.load(Ordering::Relaxed) != RW_LOCK_BIAS {
                spin_loop();
            }
        }
    }

    /// Attempts a single read acquisition.
    pub fn try_read(&self) -> Option<RwSpinLockReadGuard<'_, T>> {
        if self.count.fetch_sub(1, Ordering::Acquire) - 1 >= 0 {
            Some(RwSpinLockReadGuard { lock: self })
        } else {
            self.count.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Attempts a single write acquisition.
    pub fn try_write(&self) -> Option<RwSpinLockWriteGuard<'_, T>> {
        if self.count.fetch_sub(RW_LOCK_BIAS, Ordering::Acquire) == RW_LOCK_BIAS {
            Some(RwSpinLockWriteGuard { lock: self })
        } else {
            self.count.fetch_add(RW_LOCK_BIAS, Ordering::Relaxed);
            None
        }
    }

    /// Returns `true` if a reader could get in right now (no writer).
    pub fn can_read(&self) -> bool {
        self.count.load(Ordering::Relaxed) > 0
    }

    /// Returns `true` if a writer could get in right now (lock free).
    pub fn can_write(&self) -> bool {
        self.count.load(Ordering::Relaxed) == RW_LOCK_BIAS
    }

    /// Returns a mutable reference to the data without locking.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

/// RAII guard for shared access to an [`RwSpinLock`].
pub struct RwSpinLockReadGuard<'a, T: ?Sized> {
    lock: &'a RwSpinLock<T>,
}

impl<T: ?Sized> Deref for RwSpinLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: Read access is held — no writer can exist.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for RwSpinLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.count.fetch_add(1, Ordering::Release);
    }
}

/// RAII guard for exclusive access to an [`RwSpinLock`].
pub struct RwSpinLockWriteGuard<'a, T: ?Sized> {
    lock: &'a RwSpinLock<T>,
}

impl<T: ?Sized> Deref for RwSpinLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: Write access is held — no other reader or writer can exist.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for RwSpinLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: Write access is held — no other reader or writer can exist.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for RwSpinLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.count.fetch_add(RW_LOCK_BIAS, Ordering::Release);
    }
}
