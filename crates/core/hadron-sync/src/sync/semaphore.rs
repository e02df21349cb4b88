//! Counting semaphore.
//!
//! [`Semaphore`] limits concurrent access to a resource. Contexts acquire
//! permits before proceeding and release them when done; a context that
//! finds no permit sleeps on the semaphore's wait list.
//!
//! The counter is signed: positive means free permits, zero means no
//! permits and no waiters, negative means waiters are owed permits. Both
//! fast paths are a single atomic add with a sign test. Only contention
//! takes the wait lock, where the `sleepers` count reconciles decrements
//! that raced with an enqueue.

use core::mem;
use core::sync::atomic::{AtomicI32, Ordering};

use super::SpinLock;
use super::waitqueue::WaitList;
use crate::sched::{self, Interrupted};

/// State protected by the wait lock.
struct Waiters {
    /// Contexts whose decrement has not yet been folded back into `count`.
    sleepers: i32,
    list: WaitList,
}

/// A counting semaphore.
///
/// # Example
///
/// ```ignore
/// static SEM: Semaphore = Semaphore::new(3); // 3 concurrent permits
///
/// fn access_resource() {
///     let _permit = SEM.acquire();
///     // ... use the resource ...
///     // permit is released on drop
/// }
/// ```
pub struct Semaphore {
    count: AtomicI32,
    wait: SpinLock<Waiters>,
}

impl Semaphore {
    /// Creates a new semaphore with the given number of permits.
    ///
    /// # Panics
    ///
    /// Panics if `permits` is negative.
    pub const fn new(permits: i32) -> Self {
        assert!(permits >= 0, "semaphore created with negative permits");
        Self {
            count: AtomicI32::new(permits),
            wait: SpinLock::new(Waiters {
                sleepers: 0,
                list: WaitList::new(),
            }),
        }
    }

    /// Creates a binary semaphore (one permit).
    pub const fn new_mutex() -> Self {
        Self::new(1)
    }

    /// Creates a semaphore with no permits, for completion-style hand-off.
    pub const fn new_locked() -> Self {
        Self::new(0)
    }

    /// Acquires a permit, sleeping uninterruptibly until one is available.
    pub fn acquire(&self) -> SemaphorePermit<'_> {
        if self.count.fetch_sub(1, Ordering::Acquire) <= 0 {
            // An uninterruptible wait cannot fail.
            let _ = self.acquire_slow(false);
        }
        SemaphorePermit { sem: self }
    }

    /// Acquires a permit, giving up if a signal becomes pending.
    ///
    /// On `Err` the counter is left exactly as if this call never happened.
    /// A permit that was already granted when the signal arrived is kept.
    pub fn acquire_interruptible(&self) -> Result<SemaphorePermit<'_>, Interrupted> {
        if self.count.fetch_sub(1, Ordering::Acquire) <= 0 {
            self.acquire_slow(true)?;
        }
        Ok(SemaphorePermit { sem: self })
    }

    /// Tries to acquire a permit without sleeping.
    pub fn try_acquire(&self) -> Option<SemaphorePermit<'_>> {
        if self.count.fetch_sub(1, Ordering::Acquire) > 0 {
            return Some(SemaphorePermit { sem: self });
        }

        // Undo our decrement together with any unfolded sleepers.
        let mut wait = self.wait.lock();
        let sleepers = wait.sleepers + 1;
        wait.sleepers = 0;
        if self.count.fetch_add(sleepers, Ordering::AcqRel) + sleepers >= 0 {
            wait.list.wake(1);
        }
        None
    }

    /// Returns one permit and wakes a waiter if any is owed one.
    ///
    /// Usually called by dropping a [`SemaphorePermit`]; call it directly
    /// only to pair with [`SemaphorePermit::forget`].
    pub fn release(&self) {
        let prev = self.count.fetch_add(1, Ordering::Release);
        #[cfg(hadron_lock_debug)]
        assert!(prev < i32::MAX, "semaphore counter overflow");
        if prev < 0 {
            self.wait.lock().list.wake(1);
        }
    }

    /// Returns the raw signed counter. Diagnostics only.
    pub fn count(&self) -> i32 {
        self.count.load(Ordering::Relaxed)
    }

    fn acquire_slow(&self, interruptible: bool) -> Result<(), Interrupted> {
        let mut wait = self.wait.lock();
        let token = wait.list.add_exclusive(sched::current_waker());
        wait.sleepers += 1;

        let result = loop {
            // Fold every other sleeper's decrement back in; ours stays. If
            // the counter is still non-negative a permit is ours.
            let delta = wait.sleepers - 1;
            if self.count.fetch_add(delta, Ordering::AcqRel) + delta >= 0 {
                wait.sleepers = 0;
                break Ok(());
            }
            if interruptible && sched::signal_pending() {
                wait.sleepers = 0;
                self.count.fetch_add(1, Ordering::AcqRel);
                crate::ktrace!("semaphore: wait interrupted, count {}", self.count());
                break Err(Interrupted);
            }
            wait.sleepers = 1;

            drop(wait);
            sched::park();
            wait = self.wait.lock();
        };

        wait.list.remove(token);
        // Let the next sleeper re-evaluate the counter.
        wait.list.wake(1);
        result
    }
}

/// RAII permit that releases back to the [`Semaphore`] on drop.
pub struct SemaphorePermit<'a> {
    sem: &'a Semaphore,
}

impl SemaphorePermit<'_> {
    /// Consumes the permit without releasing it. Someone must later call
    /// [`Semaphore::release`] to give it back.
    pub fn forget(self) {
        mem::forget(self);
    }
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.sem.release();
    }
}
