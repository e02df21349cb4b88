//! Synchronization primitives for the Hadron kernel.
//!
//! This crate holds the locking layer every other subsystem builds on:
//! spin locks for short critical sections, the blocking primitives
//! (counting semaphore, reader-writer semaphore) that suspend the calling
//! context through a [`WaitQueue`](sync::WaitQueue), and sequence locks for
//! read-mostly data.
//!
//! The blocking primitives never talk to a scheduler directly. They go
//! through the hooks in [`sched`], which the kernel registers once its
//! executor is up. Until then every wait degrades to a busy-wait, which is
//! what early boot wants anyway.
//!
//! Everything here is host-testable: under `cfg(test)` (or the `std`
//! feature) the crate links `std` and [`host`] provides thread-backed hooks.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod log;
pub mod sched;
pub mod sync;

#[cfg(any(test, feature = "std"))]
pub mod host;

pub use sched::Interrupted;
