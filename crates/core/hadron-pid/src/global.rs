//! Process-wide pid allocator and task list.
//!
//! Both are set up once by [`init`] during single-threaded bootstrap and
//! live for the rest of the kernel's lifetime. Mutations of the table go
//! through the write side of [`tasklist`]; lookups take the read side.

use hadron_sync::kinfo;
use hadron_sync::sync::{OnceCell, RwSpinLock};

use crate::config::PidConfig;
use crate::error::PidError;
use crate::id::TaskId;
use crate::pidhash::{PidTable, TaskPids};
use crate::pidmap::PidMap;

/// The bootstrap context, bound to value 0 on every axis.
pub const BOOT_TASK: TaskId = TaskId(0);

static PID_MAP: PidMap = PidMap::new();

static TASKLIST: OnceCell<RwSpinLock<PidTable<TaskId>>> = OnceCell::new();

/// Initializes the pid subsystem.
///
/// Applies `config`, installs the allocator's first page, builds the table
/// and binds [`BOOT_TASK`] to value 0 on all four axes.
///
/// # Errors
///
/// Returns [`PidError::InvalidPidMax`] for an out-of-range `pid_max` and
/// [`PidError::AlreadyInitialized`] on a second call.
pub fn init(config: &PidConfig) -> Result<(), PidError> {
    config.validate()?;
    if TASKLIST.is_initialized() {
        return Err(PidError::AlreadyInitialized);
    }

    PID_MAP.set_pid_max(config.pid_max)?;
    let boot = PID_MAP.init()?;

    let mut table = PidTable::new(config.hash_shift());
    table.attach_task(BOOT_TASK, &TaskPids::uniform(boot));

    kinfo!(
        "pidhash: {} buckets per axis (order {}), pid_max {}",
        table.bucket_count(),
        table.shift(),
        PID_MAP.pid_max()
    );

    TASKLIST
        .set(RwSpinLock::new(table))
        .map_err(|_| PidError::AlreadyInitialized)
}

/// The global pid allocator.
pub fn pid_map() -> &'static PidMap {
    &PID_MAP
}

/// The global task list, or `None` before [`init`].
pub fn try_tasklist() -> Option<&'static RwSpinLock<PidTable<TaskId>>> {
    TASKLIST.get()
}

/// The global task list.
///
/// # Panics
///
/// Panics if called before [`init`].
pub fn tasklist() -> &'static RwSpinLock<PidTable<TaskId>> {
    match TASKLIST.get() {
        Some(list) => list,
        None => panic!("tasklist used before hadron_pid::global::init"),
    }
}

/// Allocates a value and registers `task` as the leader of a new thread
/// group, inheriting the process group and session of `parent`'s thread
/// group. `parent` may be any thread of that group.
///
/// # Errors
///
/// Returns [`PidError::UnknownTask`] if `parent` is not registered and
/// [`PidError::Exhausted`] if no value is free.
pub fn spawn_task(task: TaskId, parent: TaskId) -> Result<TaskPids, PidError> {
    let mut table = tasklist().write();
    let (pgid, sid) = table
        .group_ids(&parent)
        .ok_or(PidError::UnknownTask(parent))?;
    let nr = PID_MAP.alloc()?;
    let pids = TaskPids {
        pid: nr,
        tgid: nr,
        pgid,
        sid,
    };
    table.attach_task(task, &pids);
    Ok(pids)
}

/// Unregisters `task` and returns its values to the allocator.
pub fn reap_task(task: TaskId) {
    tasklist().write().release_task(&task, &PID_MAP);
}
