//! Sleeping reader-writer semaphore.
//!
//! [`RwSemaphore`] admits any number of readers or a single writer and
//! suspends contexts that cannot enter. All bookkeeping lives under one
//! internal [`SpinLock`]:
//!
//! - `activity`: `0` free, `n > 0` active readers, `-1` one active writer.
//! - a FIFO list of waiters, each tagged read or write.
//!
//! A new reader enters directly only if `activity >= 0` *and* nobody is
//! queued, so a waiting writer holds back every reader behind it. Releasing
//! the write lock grants either the writer at the head or the whole run of
//! readers at the head. The last reader out only ever hands over to a
//! writer. Downgrading grants only readers.
//!
//! Waiters are reference-counted nodes. The releasing context sets the
//! node's `granted` flag and fires its waker while holding the lock; the
//! sleeper only reads the flag, so the node stays valid for the waker even
//! if the sleeper has already returned.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::cell::UnsafeCell;
use core::mem;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};
use core::task::Waker;

use bitflags::bitflags;

use super::SpinLock;
use crate::sched;

bitflags! {
    /// What a queued context is waiting for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct WaiterFlags: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

struct Waiter {
    flags: WaiterFlags,
    waker: Waker,
    granted: AtomicBool,
}

impl Waiter {
    fn new(flags: WaiterFlags) -> Arc<Self> {
        Arc::new(Self {
            flags,
            waker: sched::current_waker(),
            granted: AtomicBool::new(false),
        })
    }

    /// Parks until a releaser grants this node.
    fn wait(&self) {
        while !self.granted.load(Ordering::Acquire) {
            sched::park();
        }
    }

    fn grant(&self) {
        self.granted.store(true, Ordering::Release);
        self.waker.wake_by_ref();
    }
}

struct RwSemState {
    activity: i32,
    waiters: VecDeque<Arc<Waiter>>,
}

impl RwSemState {
    /// Grants the head of the queue. With `wake_write == false` a writer at
    /// the head is left alone.
    fn wake_waiters(&mut self, wake_write: bool) {
        let Some(head) = self.waiters.front() else {
            return;
        };

        if head.flags.contains(WaiterFlags::WRITE) {
            if wake_write {
                self.activity = -1;
                if let Some(writer) = self.waiters.pop_front() {
                    writer.grant();
                }
            }
            return;
        }

        let mut woken = 0;
        while self
            .waiters
            .front()
            .is_some_and(|w| w.flags.contains(WaiterFlags::READ))
        {
            if let Some(reader) = self.waiters.pop_front() {
                reader.grant();
                woken += 1;
            }
        }
        self.activity += woken;
    }

    fn wake_one_writer(&mut self) {
        if self
            .waiters
            .front()
            .is_some_and(|w| w.flags.contains(WaiterFlags::WRITE))
        {
            self.wake_waiters(true);
        }
    }
}

/// A sleeping reader-writer lock protecting a `T`.
pub struct RwSemaphore<T: ?Sized> {
    state: SpinLock<RwSemState>,
    data: UnsafeCell<T>,
}

// SAFETY: The semaphore hands out either shared access (requiring `T: Sync`)
// or exclusive access (requiring `T: Send`).
unsafe impl<T: ?Sized + Send> Send for RwSemaphore<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for RwSemaphore<T> {}

impl<T> RwSemaphore<T> {
    /// Creates a new, unlocked `RwSemaphore`.
    pub const fn new(value: T) -> Self {
        Self {
            state: SpinLock::new(RwSemState {
                activity: 0,
                waiters: VecDeque::new(),
            }),
            data: UnsafeCell::new(value),
        }
    }

    /// Consumes the semaphore, returning the protected value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> RwSemaphore<T> {
    /// Acquires shared access, sleeping while a writer holds or waits for
    /// the semaphore.
    pub fn read(&self) -> RwSemReadGuard<'_, T> {
        let mut state = self.state.lock();
        if state.activity >= 0 && state.waiters.is_empty() {
            state.activity += 1;
            return RwSemReadGuard { sem: self };
        }

        let waiter = Waiter::new(WaiterFlags::READ);
        state.waiters.push_back(Arc::clone(&waiter));
        drop(state);

        waiter.wait();
        RwSemReadGuard { sem: self }
    }

    /// Acquires exclusive access, sleeping until every earlier holder and
    /// waiter is done.
    pub fn write(&self) -> RwSemWriteGuard<'_, T> {
        let mut state = self.state.lock();
        if state.activity == 0 && state.waiters.is_empty() {
            state.activity = -1;
            return RwSemWriteGuard { sem: self };
        }

        let waiter = Waiter::new(WaiterFlags::WRITE);
        state.waiters.push_back(Arc::clone(&waiter));
        drop(state);

        waiter.wait();
        RwSemWriteGuard { sem: self }
    }

    /// Attempts to acquire shared access without sleeping.
    pub fn try_read(&self) -> Option<RwSemReadGuard<'_, T>> {
        let mut state = self.state.lock();
        if state.activity >= 0 && state.waiters.is_empty() {
            state.activity += 1;
            Some(RwSemReadGuard { sem: self })
        } else {
            None
        }
    }

    /// Attempts to acquire exclusive access without sleeping.
    pub fn try_write(&self) -> Option<RwSemWriteGuard<'_, T>> {
        let mut state = self.state.lock();
        if state.activity == 0 && state.waiters.is_empty() {
            state.activity = -1;
            Some(RwSemWriteGuard { sem: self })
        } else {
            None
        }
    }

    /// Returns `true` if a reader or writer currently holds the semaphore.
    pub fn is_locked(&self) -> bool {
        self.state.lock().activity != 0
    }

    /// Returns a mutable reference to the data without locking.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn release_read(&self) {
        let mut state = self.state.lock();
        assert!(state.activity > 0, "rwsem: read release with no active reader");
        state.activity -= 1;
        if state.activity == 0 {
            state.wake_one_writer();
        }
    }

    fn release_write(&self) {
        let mut state = self.state.lock();
        assert_eq!(state.activity, -1, "rwsem: write release with no active writer");
        state.activity = 0;
        state.wake_waiters(true);
    }

    fn downgrade_write(&self) {
        let mut state = self.state.lock();
        assert_eq!(state.activity, -1, "rwsem: downgrade with no active writer");
        state.activity = 1;
        state.wake_waiters(false);
    }
}

impl<T: Default> Default for RwSemaphore<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// RAII guard for shared access to an [`RwSemaphore`].
pub struct RwSemReadGuard<'a, T: ?Sized> {
    sem: &'a RwSemaphore<T>,
}

impl<T: ?Sized> Deref for RwSemReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: Read access is held, so no writer exists.
        unsafe { &*self.sem.data.get() }
    }
}

impl<T: ?Sized> Drop for RwSemReadGuard<'_, T> {
    fn drop(&mut self) {
        self.sem.release_read();
    }
}

/// RAII guard for exclusive access to an [`RwSemaphore`].
pub struct RwSemWriteGuard<'a, T: ?Sized> {
    sem: &'a RwSemaphore<T>,
}

impl<'a, T: ?Sized> RwSemWriteGuard<'a, T> {
    /// Converts write access into read access without a window in which
    /// another writer could enter. Readers queued at the head are admitted
    /// alongside; a writer at the head keeps waiting.
    pub fn downgrade(self) -> RwSemReadGuard<'a, T> {
        let sem = self.sem;
        mem::forget(self);
        sem.downgrade_write();
        RwSemReadGuard { sem }
    }
}

impl<T: ?Sized> Deref for RwSemWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: Write access is held, so no other holder exists.
        unsafe { &*self.sem.data.get() }
    }
}

impl<T: ?Sized> DerefMut for RwSemWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: Write access is held, so no other holder exists.
        unsafe { &mut *self.sem.data.get() }
    }
}

impl<T: ?Sized> Drop for RwSemWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.sem.release_write();
    }
}
