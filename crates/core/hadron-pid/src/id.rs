//! Identifier newtypes.
//!
//! These keep pid values, classification axes and context handles from
//! being mixed up at compile time.

use core::fmt;

/// A pid value drawn from the [`PidMap`](crate::PidMap).
///
/// The same type is used on every axis; the axis is carried separately as
/// a [`PidType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Pid(u32);

impl Pid {
    /// The value bound to the bootstrap context on every axis.
    pub const BOOT: Self = Self(0);

    /// Creates a new `Pid`.
    pub const fn new(val: u32) -> Self {
        Self(val)
    }

    /// Returns the raw `u32` value.
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification axis a [`Pid`] is bound on.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PidType {
    /// Process (thread) id.
    Pid = 0,
    /// Thread-group id.
    Tgid = 1,
    /// Process-group id.
    Pgid = 2,
    /// Session id.
    Sid = 3,
}

impl PidType {
    /// Number of axes.
    pub const COUNT: usize = 4;

    /// Every axis, in table order.
    pub const ALL: [Self; Self::COUNT] = [Self::Pid, Self::Tgid, Self::Pgid, Self::Sid];

    /// Index of this axis into per-axis arrays.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Short lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Pid => "pid",
            Self::Tgid => "tgid",
            Self::Pgid => "pgid",
            Self::Sid => "sid",
        }
    }
}

impl fmt::Display for PidType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Handle of an execution context as seen by the pid table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}
