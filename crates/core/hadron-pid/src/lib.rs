//! Process identifier management for the Hadron kernel.
//!
//! Two pieces, both sized and tuned by [`config`]:
//!
//! - [`PidMap`]: a lazily populated bitmap allocator that hands out pid
//!   values round-robin above a reserved low range.
//! - [`PidTable`]: per-axis hash tables resolving a value to the
//!   context(s) bound to it on the process, thread-group, process-group and
//!   session axes.
//!
//! [`global`] holds the process-wide instances: the allocator and the
//! table behind the task-list lock.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod error;
pub mod global;
pub mod id;
pub mod pidhash;
pub mod pidmap;

pub use config::PidConfig;
pub use error::PidError;
pub use id::{Pid, PidType, TaskId};
pub use pidhash::{PidTable, TaskPids};
pub use pidmap::PidMap;
