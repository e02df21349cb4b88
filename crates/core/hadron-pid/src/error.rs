//! Pid subsystem errors.

use core::fmt;

use crate::id::{Pid, TaskId};

/// Errors returned by the pid allocator and its setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidError {
    /// Every value in `[RESERVED_PIDS, pid_max)` is in use.
    Exhausted,
    /// A `pid_max` outside `[PID_MAX_MIN, PID_MAX_LIMIT]` was requested.
    InvalidPidMax {
        /// The rejected value.
        requested: u32,
    },
    /// The value is already allocated.
    AlreadyAllocated(Pid),
    /// The value lies outside the range the operation accepts.
    OutOfRange(Pid),
    /// The allocator or the global table has already been initialized.
    AlreadyInitialized,
    /// The context is not registered in the task list.
    UnknownTask(TaskId),
}

impl fmt::Display for PidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PidError::Exhausted => write!(f, "no free pid available"),
            PidError::InvalidPidMax { requested } => {
                write!(f, "pid_max {requested} out of range")
            }
            PidError::AlreadyAllocated(pid) => write!(f, "pid {pid} already allocated"),
            PidError::OutOfRange(pid) => write!(f, "pid {pid} out of range"),
            PidError::AlreadyInitialized => write!(f, "pid subsystem already initialized"),
            PidError::UnknownTask(task) => write!(f, "{task} is not in the task list"),
        }
    }
}

impl core::error::Error for PidError {}
