//! Pid subsystem configuration.
//!
//! Compile-time geometry of the allocator and the hash table, plus the
//! [`PidConfig`] handed to [`global::init`](crate::global::init).

use crate::error::PidError;

/// Size of one bitmap page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Pid values covered by one bitmap page.
#[allow(clippy::cast_possible_truncation)]
pub const BITS_PER_PAGE: u32 = (PAGE_SIZE * 8) as u32;

/// Default upper bound (exclusive) on allocated values.
pub const PID_MAX_DEFAULT: u32 = 0x8000;

/// Values below this are never handed out by round-robin allocation once
/// the allocator is initialized.
pub const RESERVED_PIDS: u32 = 300;

/// Smallest accepted `pid_max`: leaves exactly one allocatable value.
pub const PID_MAX_MIN: u32 = RESERVED_PIDS + 1;

/// Largest accepted `pid_max`.
pub const PID_MAX_LIMIT: u32 = 4 * 1024 * 1024;

/// Number of bitmap page slots needed to cover [`PID_MAX_LIMIT`].
pub const PIDMAP_ENTRIES: usize = PID_MAX_LIMIT.div_ceil(BITS_PER_PAGE) as usize;

/// Smallest hash table order (16 buckets per axis).
pub const PIDHASH_SHIFT_MIN: u32 = 4;

/// Largest hash table order (4096 buckets per axis).
pub const PIDHASH_SHIFT_MAX: u32 = 12;

/// Picks the hash table order for a machine with `memory_mib` MiB of
/// kernel memory: `fls(memory_mib * 4)` clamped to the order bounds.
pub const fn pidhash_shift_for(memory_mib: u64) -> u32 {
    let scaled = memory_mib.saturating_mul(4);
    let fls = u64::BITS - scaled.leading_zeros();
    if fls < PIDHASH_SHIFT_MIN {
        PIDHASH_SHIFT_MIN
    } else if fls > PIDHASH_SHIFT_MAX {
        PIDHASH_SHIFT_MAX
    } else {
        fls
    }
}

/// Startup parameters for the pid subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidConfig {
    /// Upper bound (exclusive) on allocated values.
    pub pid_max: u32,
    /// Kernel memory size used to size the hash table.
    pub memory_mib: u64,
    /// Explicit hash table order; derived from `memory_mib` when `None`.
    pub hash_shift: Option<u32>,
}

impl PidConfig {
    /// Default configuration: [`PID_MAX_DEFAULT`] and the smallest table.
    pub const fn new() -> Self {
        Self {
            pid_max: PID_MAX_DEFAULT,
            memory_mib: 0,
            hash_shift: None,
        }
    }

    /// Sets `pid_max`.
    #[must_use]
    pub const fn with_pid_max(mut self, pid_max: u32) -> Self {
        self.pid_max = pid_max;
        self
    }

    /// Sets the memory size the hash table is scaled to.
    #[must_use]
    pub const fn with_memory_mib(mut self, memory_mib: u64) -> Self {
        self.memory_mib = memory_mib;
        self
    }

    /// Forces a hash table order. Clamped to the order bounds.
    #[must_use]
    pub const fn with_hash_shift(mut self, shift: u32) -> Self {
        self.hash_shift = Some(shift);
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PidError::InvalidPidMax`] if `pid_max` is outside
    /// `[PID_MAX_MIN, PID_MAX_LIMIT]`.
    pub const fn validate(&self) -> Result<(), PidError> {
        if self.pid_max < PID_MAX_MIN || self.pid_max > PID_MAX_LIMIT {
            return Err(PidError::InvalidPidMax {
                requested: self.pid_max,
            });
        }
        Ok(())
    }

    /// The hash table order this configuration selects.
    pub const fn hash_shift(&self) -> u32 {
        match self.hash_shift {
            Some(shift) if shift < PIDHASH_SHIFT_MIN => PIDHASH_SHIFT_MIN,
            Some(shift) if shift > PIDHASH_SHIFT_MAX => PIDHASH_SHIFT_MAX,
            Some(shift) => shift,
            None => pidhash_shift_for(self.memory_mib),
        }
    }
}

impl Default for PidConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry() {
        assert_eq!(BITS_PER_PAGE, 32_768);
        assert_eq!(PIDMAP_ENTRIES, 128);
    }

    #[test]
    fn shift_scales_with_memory() {
        assert_eq!(pidhash_shift_for(0), 4);
        assert_eq!(pidhash_shift_for(2), 4); // fls(8) = 4
        assert_eq!(pidhash_shift_for(64), 9); // fls(256) = 9
        assert_eq!(pidhash_shift_for(256), 11);
        assert_eq!(pidhash_shift_for(1 << 20), 12);
    }

    #[test]
    fn explicit_shift_is_clamped() {
        assert_eq!(PidConfig::new().with_hash_shift(1).hash_shift(), 4);
        assert_eq!(PidConfig::new().with_hash_shift(20).hash_shift(), 12);
        assert_eq!(PidConfig::new().with_hash_shift(7).hash_shift(), 7);
        assert_eq!(PidConfig::new().with_memory_mib(64).hash_shift(), 9);
    }

    #[test]
    fn validate_bounds() {
        assert!(PidConfig::new().validate().is_ok());
        assert!(PidConfig::new().with_pid_max(PID_MAX_MIN).validate().is_ok());
        assert_eq!(
            PidConfig::new().with_pid_max(RESERVED_PIDS).validate(),
            Err(PidError::InvalidPidMax {
                requested: RESERVED_PIDS
            })
        );
        assert!(PidConfig::new().with_pid_max(PID_MAX_LIMIT + 1).validate().is_err());
    }
}
