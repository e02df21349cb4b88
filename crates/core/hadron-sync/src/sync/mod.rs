//! Synchronization primitives for the kernel.
//!
//! Spinning: [`SpinLock`], [`RwSpinLock`]. Never suspend, never hold across
//! a blocking call.
//!
//! Blocking: [`Semaphore`], [`RwSemaphore`], and the [`WaitQueue`] they
//! park on. These suspend the caller through the [`sched`](crate::sched)
//! hooks.
//!
//! Optimistic: [`SeqCount`] and [`SeqLock`], where readers never block and
//! retry instead.

mod once;
mod rw_spinlock;
mod rwsem;
mod semaphore;
mod seqlock;
mod spinlock;
pub mod waitqueue;

pub(crate) mod loom_compat;

#[cfg(test)]
pub(crate) mod test_waker;

pub use once::OnceCell;
pub use rw_spinlock::{RW_LOCK_BIAS, RwSpinLock, RwSpinLockReadGuard, RwSpinLockWriteGuard};
pub use rwsem::{RwSemReadGuard, RwSemWriteGuard, RwSemaphore};
pub use semaphore::{Semaphore, SemaphorePermit};
pub use seqlock::{SeqCount, SeqLock, SeqLockWriteGuard};
pub use spinlock::{SpinLock, SpinLockGuard};
pub use waitqueue::{WaitFlags, WaitList, WaitQueue, WaitToken};
