//! Loom compatibility shim.
//!
//! When compiled with `cfg(loom)`, re-exports loom's atomics, fences and
//! spin hint so the optimistic primitives ([`SeqCount`](super::SeqCount),
//! [`RwSpinLock`](super::RwSpinLock)) run under loom's deterministic
//! scheduler. Otherwise, re-exports the `core` equivalents.
//!
//! Loom atomics are not `const`-constructible, so constructors of types
//! built on this shim go through [`loom_const_fn!`].

// ---------------------------------------------------------------------------
// Loom mode
// ---------------------------------------------------------------------------

#[cfg(loom)]
pub(crate) use loom::hint::spin_loop;
#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicI32, AtomicU32, Ordering, fence};

// ---------------------------------------------------------------------------
// Normal mode
// ---------------------------------------------------------------------------

#[cfg(not(loom))]
pub(crate) use core::hint::spin_loop;
#[cfg(not(loom))]
pub(crate) use core::sync::atomic::{AtomicI32, AtomicU32, Ordering, fence};

/// Declares a function that is `const` except under `cfg(loom)`.
macro_rules! loom_const_fn {
    (
        $(#[$attr:meta])*
        $vis:vis fn $name:ident ($($params:tt)*) -> $ret:ty $body:block
    ) => {
        #[cfg(not(loom))]
        $(#[$attr])*
        $vis const fn $name($($params)*) -> $ret $body

        #[cfg(loom)]
        $(#[$attr])*
        $vis fn $name($($params)*) -> $ret $body
    };
}

pub(crate) use loom_const_fn;
