//! Sequence locks for optimistic lock-free reads.
//!
//! [`SeqCount`] is the bare sequence counter: even = stable, odd = write in
//! progress. Writers bump it twice per critical section; readers sample it
//! before and after reading and retry on a mismatch. It does not serialize
//! writers; callers that already hold their own writer lock use it directly.
//!
//! [`SeqLock`] bundles a `SeqCount` with a [`SpinLock`] for writers and the
//! protected data. Best for small, frequently-read, infrequently-written
//! data (clock values, statistics snapshots). Readers never block writers.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

use super::loom_compat::{AtomicU32, Ordering, fence, loom_const_fn, spin_loop};
use super::{SpinLock, SpinLockGuard};

/// A sequence counter without its own writer lock.
///
/// The counter wraps on overflow; only equality with a snapshot matters.
pub struct SeqCount {
    seq: AtomicU32,
}

impl SeqCount {
    loom_const_fn! {
        /// Creates a counter in the stable state.
        pub fn new() -> Self {
            Self {
                seq: AtomicU32::new(0),
            }
        }
    }

    /// Returns a snapshot to validate with [`read_retry`](Self::read_retry).
    ///
    /// Loads after this call cannot be reordered before it.
    #[inline]
    pub fn read_begin(&self) -> u32 {
        self.seq.load(Ordering::Acquire)
    }

    /// Returns `true` if the data read since `start` may be inconsistent:
    /// a write was in progress at `start` or one has happened since.
    #[inline]
    pub fn read_retry(&self, start: u32) -> bool {
        // Order the data loads before the re-check.
        fence(Ordering::Acquire);
        start & 1 != 0 || self.seq.load(Ordering::Relaxed) != start
    }

    /// Enters a write section. Writers must be serialized by the caller.
    ///
    /// The counter becomes odd before any store that follows this call.
    #[inline]
    pub fn write_begin(&self) {
        let _prev = self.seq.fetch_add(1, Ordering::Relaxed);
        #[cfg(hadron_lock_debug)]
        assert!(_prev & 1 == 0, "seqcount: nested write_begin");
        fence(Ordering::Release);
    }

    /// Leaves a write section. Stores before this call are visible before
    /// the counter becomes even again.
    #[inline]
    pub fn write_end(&self) {
        let _prev = self.seq.fetch_add(1, Ordering::Release);
        #[cfg(hadron_lock_debug)]
        assert!(_prev & 1 == 1, "seqcount: write_end without write_begin");
    }

    /// Returns the raw counter value.
    pub fn sequence(&self) -> u32 {
        self.seq.load(Ordering::Relaxed)
    }
}

impl Default for SeqCount {
    fn default() -> Self {
        Self::new()
    }
}

/// A sequence lock.
///
/// Writers serialize on an internal spin lock and bump the sequence
/// number around their critical section. Readers optimistically copy the
/// data and retry if the sequence number moved.
///
/// # Constraints
///
/// `T` must be `Copy`: readers perform a bitwise copy, which may observe
/// partial writes if the sequence check fails (the copy is discarded in
/// that case).
///
/// # Example
///
/// ```ignore
/// static CLOCK: SeqLock<u64> = SeqLock::new(0);
///
/// // Reader (lock-free):
/// let time = CLOCK.read();
///
/// // Writer (exclusive):
/// let mut guard = CLOCK.write();
/// *guard = 42;
/// ```
pub struct SeqLock<T: Copy> {
    seq: SeqCount,
    writer: SpinLock<()>,
    data: UnsafeCell<T>,
}

// SAFETY: Readers only keep copies validated by the sequence check and
// writers are serialized by `writer`.
unsafe impl<T: Copy + Send> Send for SeqLock<T> {}
unsafe impl<T: Copy + Send + Sync> Sync for SeqLock<T> {}

impl<T: Copy> SeqLock<T> {
    loom_const_fn! {
        /// Creates a new `SeqLock` wrapping `value`.
        pub fn new(value: T) -> Self {
            Self {
                seq: SeqCount::new(),
                writer: SpinLock::new(()),
                data: UnsafeCell::new(value),
            }
        }
    }

    /// Starts an optimistic read section. See [`SeqCount::read_begin`].
    #[inline]
    pub fn read_begin(&self) -> u32 {
        self.seq.read_begin()
    }

    /// Ends an optimistic read section. See [`SeqCount::read_retry`].
    #[inline]
    pub fn read_retry(&self, start: u32) -> bool {
        self.seq.read_retry(start)
    }

    /// Returns a consistent copy of the data, retrying while writers are
    /// active. Never blocks a writer.
    pub fn read(&self) -> T {
        loop {
            let start = self.read_begin();
            if start & 1 != 0 {
                spin_loop();
                continue;
            }

            // SAFETY: The copy may race with a writer; a torn value is
            // discarded by the retry check below.
            let value = unsafe { core::ptr::read_volatile(self.data.get()) };

            if !self.read_retry(start) {
                return value;
            }
            spin_loop();
        }
    }

    /// Acquires exclusive write access, spinning behind other writers.
    pub fn write(&self) -> SeqLockWriteGuard<'_, T> {
        let writer = self.writer.lock();
        self.seq.write_begin();
        SeqLockWriteGuard {
            lock: self,
            _writer: writer,
        }
    }

    /// Acquires write access if no other writer holds it.
    pub fn try_write(&self) -> Option<SeqLockWriteGuard<'_, T>> {
        let writer = self.writer.try_lock()?;
        self.seq.write_begin();
        Some(SeqLockWriteGuard {
            lock: self,
            _writer: writer,
        })
    }

    /// Returns the raw sequence number.
    pub fn sequence(&self) -> u32 {
        self.seq.sequence()
    }
}

/// RAII guard for exclusive write access to a [`SeqLock`].
///
/// Dropping it ends the write section, then releases the writer lock.
pub struct SeqLockWriteGuard<'a, T: Copy> {
    lock: &'a SeqLock<T>,
    _writer: SpinLockGuard<'a, ()>,
}

impl<T: Copy> Deref for SeqLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: We hold exclusive write access.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: Copy> DerefMut for SeqLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: We hold exclusive write access.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: Copy> Drop for SeqLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.seq.write_end();
        // `_writer` is released after this body runs.
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize};
    use std::thread;

    #[derive(Clone, Copy)]
    struct Pair {
        a: u64,
        b: u64,
    }

    #[test]
    fn read_initial_value() {
        let lock = SeqLock::new(42u64);
        assert_eq!(lock.read(), 42);
        assert_eq!(lock.sequence(), 0);
    }

    #[test]
    fn write_bumps_sequence_twice() {
        let lock = SeqLock::new(0u64);
        {
            let mut guard = lock.write();
            *guard = 99;
            assert_eq!(lock.sequence(), 1);
        }
        assert_eq!(lock.sequence(), 2);
        assert_eq!(lock.read(), 99);
    }

    #[test]
    fn try_write_fails_while_writer_active() {
        let lock = SeqLock::new(0u32);
        let _guard = lock.write();
        assert!(lock.try_write().is_none());
        assert_eq!(lock.sequence(), 1);
    }

    #[test]
    fn read_retry_rules() {
        let seq = SeqCount::new();
        let s = seq.read_begin();
        assert!(!seq.read_retry(s));

        // A write that completes in between forces a retry.
        seq.write_begin();
        seq.write_end();
        assert!(seq.read_retry(s));

        // An odd snapshot always forces a retry.
        seq.write_begin();
        let odd = seq.read_begin();
        assert!(seq.read_retry(odd));
        seq.write_end();
    }

    #[test]
    fn counter_wraps() {
        let seq = SeqCount::new();
        seq.seq.store(u32::MAX - 1, Ordering::Relaxed);
        let s = seq.read_begin();
        seq.write_begin();
        assert_eq!(seq.sequence(), u32::MAX);
        seq.write_end();
        assert_eq!(seq.sequence(), 0);
        assert!(seq.read_retry(s));
        assert!(!seq.read_retry(seq.read_begin()));
    }

    #[test]
    fn readers_never_see_torn_pair() {
        let lock = SeqLock::new(Pair { a: 0, b: 0 });
        let stop = AtomicBool::new(false);

        thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|| {
                    while !stop.load(Ordering::Relaxed) {
                        let p = lock.read();
                        assert_eq!(p.a, p.b, "torn read escaped the retry check");
                    }
                });
            }

            for i in 1..=20_000u64 {
                let mut guard = lock.write();
                guard.a = i;
                guard.b = i;
            }
            stop.store(true, Ordering::Relaxed);
        });

        let p = lock.read();
        assert_eq!((p.a, p.b), (20_000, 20_000));
    }

    #[test]
    fn seqcount_guards_external_fields() {
        // Data lives outside the counter; writers are serialized by the
        // single writer thread.
        let seq = SeqCount::new();
        let a = AtomicU64::new(0);
        let b = AtomicU64::new(0);
        let stop = AtomicBool::new(false);
        let validated = AtomicUsize::new(0);

        thread::scope(|s| {
            s.spawn(|| {
                while !stop.load(Ordering::Relaxed) {
                    let start = seq.read_begin();
                    let (x, y) = (a.load(Ordering::Relaxed), b.load(Ordering::Relaxed));
                    if !seq.read_retry(start) {
                        assert_eq!(x, y);
                        validated.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });

            for i in 1..=20_000u64 {
                seq.write_begin();
                a.store(i, Ordering::Relaxed);
                b.store(i, Ordering::Relaxed);
                seq.write_end();
            }
            stop.store(true, Ordering::Relaxed);
        });

        assert_eq!(seq.sequence(), 40_000);
    }

    #[test]
    fn writer_not_blocked_by_readers() {
        let lock = SeqLock::new(0u64);
        // An open read section does not hold anything a writer needs.
        let start = lock.read_begin();
        {
            let mut guard = lock.write();
            *guard = 1;
        }
        assert!(lock.read_retry(start));

        let stop = AtomicBool::new(false);
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    while !stop.load(Ordering::Relaxed) {
                        let _ = lock.read();
                    }
                });
            }
            for _ in 0..1_000 {
                *lock.write() += 1;
            }
            stop.store(true, Ordering::Relaxed);
        });
        assert_eq!(lock.read(), 1_001);
    }
}
