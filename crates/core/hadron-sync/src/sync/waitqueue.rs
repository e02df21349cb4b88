//! Wait queues for blocked execution contexts.
//!
//! A [`WaitList`] is an ordered list of [`Waker`]s, each tagged with
//! [`WaitFlags`]. Waking walks the list front to back, resuming every
//! non-exclusive waiter and at most `nr_exclusive` exclusive ones. Entries
//! stay queued until their owner removes them with the [`WaitToken`] it got
//! from [`add`](WaitList::add); a waker never unlinks a waiter.
//!
//! [`WaitQueue`] is a `WaitList` behind a [`SpinLock`] plus the
//! `wait_event*` helpers that implement the enqueue / re-check / park loop.
//! Primitives that keep their own state next to the list (the semaphore's
//! sleeper count) embed a bare `WaitList` under their own lock instead.

use alloc::collections::VecDeque;
use core::task::Waker;

use bitflags::bitflags;

use super::{SpinLock, SpinLockGuard};
use crate::sched::{self, Interrupted};

bitflags! {
    /// Per-entry wake policy.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WaitFlags: u8 {
        /// Counted against `nr_exclusive` when waking.
        const EXCLUSIVE = 1 << 0;
    }
}

/// Identifies an entry on a [`WaitList`] for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitToken(u64);

struct WaitEntry {
    token: WaitToken,
    flags: WaitFlags,
    waker: Waker,
}

/// An unlocked FIFO list of waiting contexts.
pub struct WaitList {
    entries: VecDeque<WaitEntry>,
    next_token: u64,
}

impl WaitList {
    /// Creates an empty list.
    pub const fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_token: 0,
        }
    }

    /// Appends a waiter and returns its token.
    pub fn add(&mut self, flags: WaitFlags, waker: Waker) -> WaitToken {
        let token = WaitToken(self.next_token);
        self.next_token = self.next_token.wrapping_add(1);
        self.entries.push_back(WaitEntry {
            token,
            flags,
            waker,
        });
        token
    }

    /// Appends an exclusive waiter.
    pub fn add_exclusive(&mut self, waker: Waker) -> WaitToken {
        self.add(WaitFlags::EXCLUSIVE, waker)
    }

    /// Removes the entry for `token`. Returns `false` if it was not queued.
    pub fn remove(&mut self, token: WaitToken) -> bool {
        match self.entries.iter().position(|e| e.token == token) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Wakes every non-exclusive entry and up to `nr_exclusive` exclusive
    /// entries, in queue order. `nr_exclusive == 0` wakes everyone.
    ///
    /// Returns the number of entries woken.
    pub fn wake(&self, nr_exclusive: usize) -> usize {
        let mut budget = nr_exclusive;
        let mut woken = 0;
        for entry in &self.entries {
            entry.waker.wake_by_ref();
            woken += 1;
            if entry.flags.contains(WaitFlags::EXCLUSIVE) && nr_exclusive != 0 {
                budget -= 1;
                if budget == 0 {
                    break;
                }
            }
        }
        woken
    }

    /// Returns `true` if nobody is waiting.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Default for WaitList {
    fn default() -> Self {
        Self::new()
    }
}

/// A [`WaitList`] with its own lock.
pub struct WaitQueue {
    list: SpinLock<WaitList>,
}

impl WaitQueue {
    /// Creates an empty wait queue.
    pub const fn new() -> Self {
        Self {
            list: SpinLock::new(WaitList::new()),
        }
    }

    /// Locks the underlying list.
    pub fn lock(&self) -> SpinLockGuard<'_, WaitList> {
        self.list.lock()
    }

    /// Wakes all non-exclusive waiters and one exclusive waiter.
    pub fn wake_up(&self) -> usize {
        self.list.lock().wake(1)
    }

    /// Wakes all non-exclusive waiters and up to `nr` exclusive waiters
    /// (`0` wakes everyone).
    pub fn wake_up_nr(&self, nr: usize) -> usize {
        self.list.lock().wake(nr)
    }

    /// Wakes every waiter.
    pub fn wake_up_all(&self) -> usize {
        self.list.lock().wake(0)
    }

    /// Returns `true` if nobody is waiting.
    pub fn is_empty(&self) -> bool {
        self.list.lock().is_empty()
    }

    /// Blocks until `cond` returns `true`.
    ///
    /// The condition must be made true *before* the matching `wake_*` call.
    pub fn wait_event(&self, cond: impl FnMut() -> bool) {
        // An uninterruptible wait cannot fail.
        let _ = self.wait_common(WaitFlags::empty(), false, cond);
    }

    /// Blocks until `cond` returns `true` or a signal becomes pending.
    ///
    /// A condition that is already true wins over a pending signal.
    pub fn wait_event_interruptible(&self, cond: impl FnMut() -> bool) -> Result<(), Interrupted> {
        self.wait_common(WaitFlags::empty(), true, cond)
    }

    /// Like [`wait_event`](Self::wait_event), but queued as an exclusive
    /// waiter so that [`wake_up`](Self::wake_up) resumes only one such
    /// context.
    pub fn wait_event_exclusive(&self, cond: impl FnMut() -> bool) {
        let _ = self.wait_common(WaitFlags::EXCLUSIVE, false, cond);
    }

    fn wait_common(
        &self,
        flags: WaitFlags,
        interruptible: bool,
        mut cond: impl FnMut() -> bool,
    ) -> Result<(), Interrupted> {
        if cond() {
            return Ok(());
        }

        let token = self.list.lock().add(flags, sched::current_waker());
        let result = loop {
            // Re-check after publishing the waker: a wake that raced with
            // the enqueue is either seen here or left as a park token.
            if cond() {
                break Ok(());
            }
            if interruptible && sched::signal_pending() {
                break Err(Interrupted);
            }
            sched::park();
        };

        let mut list = self.list.lock();
        list.remove(token);
        if flags.contains(WaitFlags::EXCLUSIVE) {
            // A wake aimed at us may have arrived after the condition came
            // true on its own; hand it to the next exclusive waiter.
            list.wake(1);
        }
        result
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::test_waker::{counting_waker, noop_waker};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn add_and_remove() {
        let mut list = WaitList::new();
        let t1 = list.add(WaitFlags::empty(), noop_waker());
        let t2 = list.add_exclusive(noop_waker());
        assert_eq!(list.len(), 2);
        assert!(list.remove(t1));
        assert!(!list.remove(t1));
        assert!(list.remove(t2));
        assert!(list.is_empty());
    }

    #[test]
    fn wake_counts_exclusive_only() {
        let mut list = WaitList::new();
        let (w1, c1) = counting_waker();
        let (w2, c2) = counting_waker();
        let (w3, c3) = counting_waker();
        let (w4, c4) = counting_waker();
        list.add_exclusive(w1);
        list.add(WaitFlags::empty(), w2);
        list.add_exclusive(w3);
        list.add(WaitFlags::empty(), w4);

        // First exclusive waiter uses up the budget; the walk stops there.
        assert_eq!(list.wake(1), 1);
        assert_eq!(c1.load(Ordering::SeqCst), 1);
        assert_eq!(c2.load(Ordering::SeqCst), 0);

        // Budget of two reaches the second exclusive entry.
        assert_eq!(list.wake(2), 3);
        assert_eq!(c1.load(Ordering::SeqCst), 2);
        assert_eq!(c2.load(Ordering::SeqCst), 1);
        assert_eq!(c3.load(Ordering::SeqCst), 1);
        assert_eq!(c4.load(Ordering::SeqCst), 0);

        // Entries are not unlinked by waking.
        assert_eq!(list.len(), 4);
    }

    #[test]
    fn wake_all_wakes_everyone() {
        let wq = WaitQueue::new();
        let (w1, c1) = counting_waker();
        let (w2, c2) = counting_waker();
        wq.lock().add_exclusive(w1);
        wq.lock().add_exclusive(w2);
        assert_eq!(wq.wake_up_all(), 2);
        assert_eq!(c1.load(Ordering::SeqCst), 1);
        assert_eq!(c2.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wake_up_nr_limits_exclusive_wakes() {
        let wq = WaitQueue::new();
        let counters: Vec<_> = (0..3)
            .map(|_| {
                let (w, c) = counting_waker();
                wq.lock().add_exclusive(w);
                c
            })
            .collect();
        assert_eq!(wq.wake_up_nr(2), 2);
        assert_eq!(counters[2].load(Ordering::SeqCst), 0);
        assert_eq!(wq.wake_up_nr(0), 3);
        assert_eq!(counters[2].load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wake_empty_no_panic() {
        let wq = WaitQueue::new();
        assert_eq!(wq.wake_up(), 0);
        assert_eq!(wq.wake_up_all(), 0);
    }

    #[test]
    fn wait_event_returns_immediately_when_true() {
        let wq = WaitQueue::new();
        wq.wait_event(|| true);
        assert!(wq.is_empty());
    }

    #[test]
    fn wait_event_sees_condition_set_before_wake() {
        crate::host::install();
        let wq = Arc::new(WaitQueue::new());
        let flag = Arc::new(AtomicBool::new(false));

        let waiter = {
            let (wq, flag) = (Arc::clone(&wq), Arc::clone(&flag));
            thread::spawn(move || {
                wq.wait_event(|| flag.load(Ordering::Acquire));
            })
        };

        thread::sleep(Duration::from_millis(20));
        flag.store(true, Ordering::Release);
        wq.wake_up_all();
        waiter.join().unwrap();
        assert!(wq.is_empty());
    }

    #[test]
    fn wait_event_interruptible_reports_signal() {
        crate::host::install();
        let wq = Arc::new(WaitQueue::new());
        let (tx, rx) = std::sync::mpsc::channel();

        let waiter = {
            let wq = Arc::clone(&wq);
            thread::spawn(move || {
                tx.send(crate::host::current()).unwrap();
                let res = wq.wait_event_interruptible(|| false);
                crate::host::current().clear_signal();
                res
            })
        };

        let ctx = rx.recv().unwrap();
        thread::sleep(Duration::from_millis(20));
        ctx.raise_signal();
        assert_eq!(waiter.join().unwrap(), Err(Interrupted));
        assert!(wq.is_empty());
    }

    #[test]
    fn exclusive_exit_passes_the_wake_on() {
        crate::host::install();
        let wq = WaitQueue::new();
        let ready = AtomicBool::new(false);
        let (w, c) = counting_waker();

        thread::scope(|s| {
            s.spawn(|| {
                wq.wait_event_exclusive(|| ready.load(Ordering::Acquire));
            });
            while wq.lock().is_empty() {
                thread::yield_now();
            }
            // Queued behind the sleeping thread.
            wq.lock().add_exclusive(w);
            ready.store(true, Ordering::Release);
            wq.wake_up();
        });

        // The woken thread left and handed the wake to the next entry.
        assert!(c.load(Ordering::SeqCst) >= 1);
        assert_eq!(wq.lock().len(), 1);
    }

    #[test]
    fn exclusive_waiters_are_released_one_by_one() {
        crate::host::install();
        let wq = Arc::new(WaitQueue::new());
        let tickets = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let (wq, tickets, done) = (Arc::clone(&wq), Arc::clone(&tickets), Arc::clone(&done));
                thread::spawn(move || {
                    wq.wait_event_exclusive(|| {
                        tickets
                            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |t| t.checked_sub(1))
                            .is_ok()
                    });
                    done.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        for _ in 0..3 {
            tickets.fetch_add(1, Ordering::SeqCst);
            wq.wake_up();
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(tickets.load(Ordering::SeqCst), 0);
    }
}
