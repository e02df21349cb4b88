//! Blocking hooks between the primitives and the scheduler.
//!
//! A blocked context is represented by a [`Waker`]: a waiter publishes the
//! waker for the current context on a wait list, drops the list lock, and
//! calls [`park`]. Whoever grants it the resource fires the waker.
//!
//! The kernel installs a [`ParkOps`] table once its executor can suspend
//! contexts. Until then the defaults busy-wait, so the primitives work
//! during single-threaded bootstrap:
//!
//! - `current_waker` returns a no-op waker,
//! - `park` is a spin-loop hint,
//! - `signal_pending` is always `false`.

use core::fmt;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};
use core::task::Waker;

/// Scheduler entry points used by the blocking primitives.
pub struct ParkOps {
    /// Returns a waker that makes the calling context runnable again.
    pub current_waker: fn() -> Waker,
    /// Suspends the calling context until its waker fires.
    ///
    /// Must have token semantics: a wake delivered after the waker was
    /// published but before `park` is entered makes `park` return
    /// immediately. Spurious returns are allowed.
    pub park: fn(),
    /// Returns `true` if the calling context has a pending interruption.
    pub signal_pending: fn() -> bool,
}

static PARK_OPS: AtomicPtr<ParkOps> = AtomicPtr::new(ptr::null_mut());

/// Registers the scheduler's park operations.
///
/// # Safety
///
/// Must be called before any context can block on a primitive from this
/// crate, or while no context is blocked: a waiter that published a
/// default (no-op) waker would otherwise never be woken by a real `park`.
/// The functions must not acquire any primitive from this crate.
pub unsafe fn set_park_ops(ops: &'static ParkOps) {
    PARK_OPS.store(ptr::from_ref(ops).cast_mut(), Ordering::Release);
}

#[inline]
fn ops() -> Option<&'static ParkOps> {
    let ptr = PARK_OPS.load(Ordering::Acquire);
    // SAFETY: Only `&'static ParkOps` references are ever stored.
    unsafe { ptr.as_ref() }
}

/// Returns a waker for the calling context.
pub fn current_waker() -> Waker {
    match ops() {
        Some(ops) => (ops.current_waker)(),
        None => Waker::noop().clone(),
    }
}

/// Suspends the calling context until it is woken (or spuriously).
///
/// Callers must never hold a [`SpinLock`](crate::sync::SpinLock) here.
pub fn park() {
    match ops() {
        Some(ops) => (ops.park)(),
        None => core::hint::spin_loop(),
    }
}

/// Returns `true` if the calling context has a pending interruption.
pub fn signal_pending() -> bool {
    ops().is_some_and(|ops| (ops.signal_pending)())
}

/// An interruptible wait was abandoned because a signal became pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wait interrupted by pending signal")
    }
}

impl core::error::Error for Interrupted {}
