//! Waker helpers for wait-list unit tests.
//!
//! Provides [`noop_waker`] and [`counting_waker`] so queue policies can be
//! checked without parking real threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Wake, Waker};

/// Creates a [`Waker`] that does nothing when woken.
pub fn noop_waker() -> Waker {
    Waker::noop().clone()
}

struct CountingWake(Arc<AtomicUsize>);

impl Wake for CountingWake {
    fn wake(self: Arc<Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Creates a [`Waker`] that increments a counter each time it is woken.
///
/// Returns the waker and the counter that tracks wake calls.
pub fn counting_waker() -> (Waker, Arc<AtomicUsize>) {
    let counter = Arc::new(AtomicUsize::new(0));
    let waker = Waker::from(Arc::new(CountingWake(Arc::clone(&counter))));
    (waker, counter)
}
