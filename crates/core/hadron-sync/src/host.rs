//! Thread-backed blocking hooks for host builds.
//!
//! Maps the [`sched`](crate::sched) hooks onto `std::thread` parking so the
//! blocking primitives can be exercised with real OS threads. Each thread
//! gets a [`HostContext`] holding its `Thread` handle and a pending-signal
//! flag; tests raise the flag through a [`ContextHandle`] to drive the
//! interruptible paths.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::task::{Wake, Waker};
use std::thread::{self, Thread};

use crate::sched::{self, ParkOps};

/// Per-thread execution context.
struct HostContext {
    thread: Thread,
    signal: AtomicBool,
}

impl Wake for HostContext {
    fn wake(self: Arc<Self>) {
        self.thread.unpark();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.thread.unpark();
    }
}

thread_local! {
    static CURRENT: Arc<HostContext> = Arc::new(HostContext {
        thread: thread::current(),
        signal: AtomicBool::new(false),
    });
}

fn host_current_waker() -> Waker {
    CURRENT.with(|ctx| Waker::from(Arc::clone(ctx)))
}

fn host_park() {
    thread::park();
}

fn host_signal_pending() -> bool {
    CURRENT.with(|ctx| ctx.signal.load(Ordering::Acquire))
}

static HOST_OPS: ParkOps = ParkOps {
    current_waker: host_current_waker,
    park: host_park,
    signal_pending: host_signal_pending,
};

/// Installs the thread-backed hooks. Idempotent.
///
/// Parking is unbounded, so a missed wake hangs the waiter. Call this
/// before any thread can block: a waker published under the default hooks
/// is a no-op.
pub fn install() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        // SAFETY: The host hooks touch only thread-locals and `Thread`
        // handles, never a primitive from this crate.
        unsafe { sched::set_park_ops(&HOST_OPS) };
    });
}

/// A handle to another thread's context.
#[derive(Clone)]
pub struct ContextHandle(Arc<HostContext>);

impl ContextHandle {
    /// Marks a signal pending on the target context and wakes it.
    pub fn raise_signal(&self) {
        self.0.signal.store(true, Ordering::Release);
        self.0.thread.unpark();
    }

    /// Clears the pending-signal flag.
    pub fn clear_signal(&self) {
        self.0.signal.store(false, Ordering::Release);
    }
}

/// Returns a handle to the calling thread's context.
pub fn current() -> ContextHandle {
    CURRENT.with(|ctx| ContextHandle(Arc::clone(ctx)))
}
