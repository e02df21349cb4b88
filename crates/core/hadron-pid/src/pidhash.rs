//! Pid lookup table.
//!
//! One hash table per [`PidType`] axis maps a pid value to the contexts
//! bound to it. Several contexts may share a value on an axis (all threads
//! of a process share the thread-group id): the first one to attach sits in
//! the hash chain, later ones queue behind it as peers. When the chain
//! owner detaches, the oldest peer takes its place.
//!
//! The table has no lock of its own. Lookups need shared access and every
//! mutation needs exclusive access to the surrounding task-list lock, so a
//! caller can batch several updates (an exec, a fork) into one critical
//! section.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use core::fmt::Debug;

use crate::config::{PIDHASH_SHIFT_MAX, PIDHASH_SHIFT_MIN};
use crate::id::{Pid, PidType};
use crate::pidmap::PidMap;

/// Multiplier for [`hash_long`]: a prime close to the golden ratio of
/// 2^64 with sparse bits.
const GOLDEN_RATIO_PRIME: u64 = 0x9e37_ffff_fffc_0001;

/// Multiplicative hash of `val` into `bits` bits.
#[allow(clippy::cast_possible_truncation)]
pub const fn hash_long(val: u32, bits: u32) -> usize {
    ((val as u64).wrapping_mul(GOLDEN_RATIO_PRIME) >> (64 - bits)) as usize
}

/// All contexts bound to one value on one axis.
struct PidChain<O> {
    nr: Pid,
    /// The context linked into the hash chain.
    owner: O,
    /// Contexts sharing `nr`, oldest first.
    peers: VecDeque<O>,
}

type Bucket<O> = VecDeque<PidChain<O>>;

/// The four values a context is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskPids {
    /// Process (thread) id.
    pub pid: Pid,
    /// Thread-group id.
    pub tgid: Pid,
    /// Process-group id.
    pub pgid: Pid,
    /// Session id.
    pub sid: Pid,
}

impl TaskPids {
    /// The same value on every axis, as for a fresh session leader.
    pub const fn uniform(nr: Pid) -> Self {
        Self {
            pid: nr,
            tgid: nr,
            pgid: nr,
            sid: nr,
        }
    }

    /// Returns the value for `ty`.
    pub const fn get(&self, ty: PidType) -> Pid {
        match ty {
            PidType::Pid => self.pid,
            PidType::Tgid => self.tgid,
            PidType::Pgid => self.pgid,
            PidType::Sid => self.sid,
        }
    }

    /// A thread-group leader's pid equals its thread-group id.
    pub fn is_group_leader(&self) -> bool {
        self.pid == self.tgid
    }
}

/// Per-axis hash tables from pid values to owning contexts.
///
/// `O` is the context handle, typically a [`TaskId`](crate::TaskId).
pub struct PidTable<O> {
    shift: u32,
    buckets: [Vec<Bucket<O>>; PidType::COUNT],
    /// Reverse index: what each context is bound to.
    links: BTreeMap<O, [Option<Pid>; PidType::COUNT]>,
}

impl<O: Clone + Ord + Debug> PidTable<O> {
    /// Creates an empty table with `1 << shift` buckets per axis.
    ///
    /// # Panics
    ///
    /// Panics if `shift` is outside `[PIDHASH_SHIFT_MIN, PIDHASH_SHIFT_MAX]`.
    pub fn new(shift: u32) -> Self {
        assert!(
            (PIDHASH_SHIFT_MIN..=PIDHASH_SHIFT_MAX).contains(&shift),
            "pidhash: order {shift} out of range"
        );
        let size = 1usize << shift;
        Self {
            shift,
            buckets: core::array::from_fn(|_| (0..size).map(|_| VecDeque::new()).collect()),
            links: BTreeMap::new(),
        }
    }

    /// Table order (log2 of buckets per axis).
    pub fn shift(&self) -> u32 {
        self.shift
    }

    /// Buckets per axis.
    pub fn bucket_count(&self) -> usize {
        1 << self.shift
    }

    fn bucket(&self, ty: PidType, nr: Pid) -> &Bucket<O> {
        &self.buckets[ty.index()][hash_long(nr.as_u32(), self.shift)]
    }

    fn bucket_mut(&mut self, ty: PidType, nr: Pid) -> &mut Bucket<O> {
        &mut self.buckets[ty.index()][hash_long(nr.as_u32(), self.shift)]
    }

    fn chain(&self, ty: PidType, nr: Pid) -> Option<&PidChain<O>> {
        self.bucket(ty, nr).iter().find(|chain| chain.nr == nr)
    }

    /// Returns the context in the hash chain for `nr` on axis `ty`.
    pub fn lookup(&self, ty: PidType, nr: Pid) -> Option<&O> {
        self.chain(ty, nr).map(|chain| &chain.owner)
    }

    /// Iterates every context bound to `nr` on axis `ty`: the chain owner
    /// first, then its peers in attach order.
    pub fn owners(&self, ty: PidType, nr: Pid) -> impl Iterator<Item = &O> + '_ {
        self.chain(ty, nr)
            .into_iter()
            .flat_map(|chain| core::iter::once(&chain.owner).chain(chain.peers.iter()))
    }

    /// Returns the value `owner` is bound to on axis `ty`.
    pub fn pid_of(&self, owner: &O, ty: PidType) -> Option<Pid> {
        self.links.get(owner).and_then(|link| link[ty.index()])
    }

    /// Process group and session a child of `owner` inherits: those of
    /// the thread group `owner` belongs to.
    ///
    /// Returns `None` if `owner` is not registered or no member of its
    /// thread group carries group bindings.
    pub fn group_ids(&self, owner: &O) -> Option<(Pid, Pid)> {
        let tgid = self.pid_of(owner, PidType::Tgid)?;
        self.owners(PidType::Tgid, tgid).find_map(|member| {
            Some((
                self.pid_of(member, PidType::Pgid)?,
                self.pid_of(member, PidType::Sid)?,
            ))
        })
    }

    /// Binds `owner` to `nr` on axis `ty`.
    ///
    /// If another context already holds `nr` on that axis, `owner` joins it
    /// as a peer; otherwise `owner` becomes the chain owner.
    ///
    /// # Panics
    ///
    /// Panics if `owner` is already bound on `ty`.
    pub fn attach(&mut self, owner: O, ty: PidType, nr: Pid) {
        let link = self.links.entry(owner.clone()).or_insert([None; PidType::COUNT]);
        if let Some(old) = link[ty.index()] {
            panic!("pidhash: {owner:?} already attached to {ty} {old}");
        }
        link[ty.index()] = Some(nr);

        let bucket = self.bucket_mut(ty, nr);
        if let Some(chain) = bucket.iter_mut().find(|chain| chain.nr == nr) {
            chain.peers.push_back(owner);
        } else {
            bucket.push_front(PidChain {
                nr,
                owner,
                peers: VecDeque::new(),
            });
        }
    }

    /// Unbinds `owner` on axis `ty`.
    ///
    /// Returns the value if this was its last binding on the axis, i.e. the
    /// value is no longer in use there. Returns `None` if a peer remains
    /// (and was promoted if needed) or `owner` was not bound.
    pub fn detach(&mut self, owner: &O, ty: PidType) -> Option<Pid> {
        let link = self.links.get_mut(owner)?;
        let nr = link[ty.index()].take()?;
        if link.iter().all(Option::is_none) {
            self.links.remove(owner);
        }

        let bucket = self.bucket_mut(ty, nr);
        let Some(pos) = bucket.iter().position(|chain| chain.nr == nr) else {
            panic!("pidhash: {ty} {nr} bound to {owner:?} but not hashed");
        };
        let chain = &mut bucket[pos];

        if chain.owner == *owner {
            if let Some(next) = chain.peers.pop_front() {
                chain.owner = next;
                return None;
            }
            bucket.remove(pos);
            return Some(nr);
        }

        let Some(peer) = chain.peers.iter().position(|o| o == owner) else {
            panic!("pidhash: {owner:?} bound to {ty} {nr} but not linked");
        };
        chain.peers.remove(peer);
        None
    }

    /// Unbinds `owner` on axis `ty` and frees the value in `map` once no
    /// axis resolves it any more. Returns the freed value.
    ///
    /// The bootstrap value is never freed.
    pub fn detach_pid(&mut self, owner: &O, ty: PidType, map: &PidMap) -> Option<Pid> {
        let nr = self.detach(owner, ty)?;
        if nr == Pid::BOOT {
            return None;
        }
        if PidType::ALL
            .iter()
            .any(|&other| other != ty && self.chain(other, nr).is_some())
        {
            return None;
        }
        map.free(nr);
        Some(nr)
    }

    /// Registers a new context: pid and thread-group id always, process
    /// group and session only for a thread-group leader.
    pub fn attach_task(&mut self, owner: O, pids: &TaskPids) {
        self.attach(owner.clone(), PidType::Pid, pids.pid);
        self.attach(owner.clone(), PidType::Tgid, pids.tgid);
        if pids.is_group_leader() {
            self.attach(owner.clone(), PidType::Pgid, pids.pgid);
            self.attach(owner, PidType::Sid, pids.sid);
        }
    }

    /// Removes every binding of `owner`, freeing values that fall out of
    /// use.
    pub fn release_task(&mut self, owner: &O, map: &PidMap) {
        for ty in PidType::ALL {
            self.detach_pid(owner, ty, map);
        }
    }

    /// Exec by a non-leader thread: `thread` takes over the thread-group id
    /// as its pid and the leader's group and session, while `leader` is
    /// rebound to `thread`'s former pid. No value is freed.
    ///
    /// # Panics
    ///
    /// Panics if `leader` is not bound on all four axes or `thread` is not
    /// bound on the pid and thread-group axes.
    pub fn switch_exec_pids(&mut self, leader: &O, thread: &O) {
        let bound = |ty: PidType, who: &O| {
            self.pid_of(who, ty)
                .unwrap_or_else(|| panic!("pidhash: {who:?} has no {ty} binding"))
        };
        let pgid = bound(PidType::Pgid, leader);
        let sid = bound(PidType::Sid, leader);
        let _ = bound(PidType::Pid, leader);
        let _ = bound(PidType::Tgid, leader);
        let thread_pid = bound(PidType::Pid, thread);
        let tgid = bound(PidType::Tgid, thread);

        for ty in PidType::ALL {
            self.detach(leader, ty);
        }
        self.detach(thread, PidType::Pid);
        self.detach(thread, PidType::Tgid);

        self.attach_task(
            thread.clone(),
            &TaskPids {
                pid: tgid,
                tgid,
                pgid,
                sid,
            },
        );
        self.attach_task(
            leader.clone(),
            &TaskPids {
                pid: thread_pid,
                tgid: thread_pid,
                pgid,
                sid,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::TaskId;

    fn table() -> PidTable<TaskId> {
        PidTable::new(PIDHASH_SHIFT_MIN)
    }

    fn fresh_map() -> PidMap {
        let map = PidMap::new();
        map.init().unwrap();
        map
    }

    #[test]
    fn hash_stays_in_range() {
        for shift in PIDHASH_SHIFT_MIN..=PIDHASH_SHIFT_MAX {
            for nr in [0, 1, 300, 32_767, 4_194_303] {
                assert!(hash_long(nr, shift) < 1 << shift);
            }
        }
        assert_eq!(hash_long(0, 4), 0);
    }

    #[test]
    fn lookup_after_attach() {
        let mut t = table();
        assert!(t.lookup(PidType::Pid, Pid::new(300)).is_none());
        t.attach(TaskId(1), PidType::Pid, Pid::new(300));
        assert_eq!(t.lookup(PidType::Pid, Pid::new(300)), Some(&TaskId(1)));
        // Other axes are independent.
        assert!(t.lookup(PidType::Tgid, Pid::new(300)).is_none());
        assert_eq!(t.pid_of(&TaskId(1), PidType::Pid), Some(Pid::new(300)));
    }

    #[test]
    fn colliding_values_share_a_bucket() {
        let mut t = table();
        // Find two distinct values hashing to the same bucket.
        let a = 300;
        let b = (301..).find(|&n| hash_long(n, t.shift()) == hash_long(a, t.shift())).unwrap();
        t.attach(TaskId(1), PidType::Pid, Pid::new(a));
        t.attach(TaskId(2), PidType::Pid, Pid::new(b));
        assert_eq!(t.lookup(PidType::Pid, Pid::new(a)), Some(&TaskId(1)));
        assert_eq!(t.lookup(PidType::Pid, Pid::new(b)), Some(&TaskId(2)));
        assert_eq!(t.detach(&TaskId(1), PidType::Pid), Some(Pid::new(a)));
        assert_eq!(t.lookup(PidType::Pid, Pid::new(b)), Some(&TaskId(2)));
    }

    #[test]
    fn sharing_and_promotion() {
        let mut t = table();
        let nr = Pid::new(400);
        for id in 1..=3 {
            t.attach(TaskId(id), PidType::Tgid, nr);
        }
        let owners: Vec<_> = t.owners(PidType::Tgid, nr).copied().collect();
        assert_eq!(owners, [TaskId(1), TaskId(2), TaskId(3)]);

        // Removing a peer leaves the owner alone.
        assert_eq!(t.detach(&TaskId(2), PidType::Tgid), None);
        assert_eq!(t.lookup(PidType::Tgid, nr), Some(&TaskId(1)));

        // Removing the owner promotes the next peer.
        assert_eq!(t.detach(&TaskId(1), PidType::Tgid), None);
        assert_eq!(t.lookup(PidType::Tgid, nr), Some(&TaskId(3)));

        // The last reference reports the value.
        assert_eq!(t.detach(&TaskId(3), PidType::Tgid), Some(nr));
        assert!(t.lookup(PidType::Tgid, nr).is_none());
        assert_eq!(t.owners(PidType::Tgid, nr).count(), 0);
    }

    #[test]
    fn detach_unbound_is_noop() {
        let mut t = table();
        assert_eq!(t.detach(&TaskId(9), PidType::Sid), None);
        t.attach(TaskId(9), PidType::Pid, Pid::new(301));
        assert_eq!(t.detach(&TaskId(9), PidType::Sid), None);
        assert_eq!(t.lookup(PidType::Pid, Pid::new(301)), Some(&TaskId(9)));
    }

    #[test]
    #[should_panic(expected = "already attached")]
    fn double_attach_panics() {
        let mut t = table();
        t.attach(TaskId(1), PidType::Pid, Pid::new(300));
        t.attach(TaskId(1), PidType::Pid, Pid::new(301));
    }

    #[test]
    fn value_freed_only_when_no_axis_uses_it() {
        let map = fresh_map();
        let nr = map.alloc().unwrap();
        let mut t = table();
        t.attach_task(TaskId(1), &TaskPids::uniform(nr));

        assert_eq!(t.detach_pid(&TaskId(1), PidType::Pid, &map), None);
        assert_eq!(t.detach_pid(&TaskId(1), PidType::Tgid, &map), None);
        assert_eq!(t.detach_pid(&TaskId(1), PidType::Pgid, &map), None);
        assert!(map.is_allocated(nr));
        assert_eq!(t.detach_pid(&TaskId(1), PidType::Sid, &map), Some(nr));
        assert!(!map.is_allocated(nr));
    }

    #[test]
    fn attach_task_skips_group_axes_for_threads() {
        let mut t = table();
        let leader = TaskPids::uniform(Pid::new(300));
        let thread = TaskPids {
            pid: Pid::new(301),
            ..leader
        };
        t.attach_task(TaskId(1), &leader);
        t.attach_task(TaskId(2), &thread);

        assert_eq!(t.pid_of(&TaskId(2), PidType::Pgid), None);
        assert_eq!(t.pid_of(&TaskId(2), PidType::Sid), None);
        let group: Vec<_> = t.owners(PidType::Tgid, Pid::new(300)).copied().collect();
        assert_eq!(group, [TaskId(1), TaskId(2)]);
    }

    #[test]
    fn group_ids_resolve_through_the_leader() {
        let mut t = table();
        let leader = TaskPids {
            pid: Pid::new(300),
            tgid: Pid::new(300),
            pgid: Pid::new(7),
            sid: Pid::new(5),
        };
        let thread = TaskPids {
            pid: Pid::new(301),
            ..leader
        };
        t.attach_task(TaskId(1), &leader);
        t.attach_task(TaskId(2), &thread);

        let expected = Some((Pid::new(7), Pid::new(5)));
        assert_eq!(t.group_ids(&TaskId(1)), expected);
        assert_eq!(t.group_ids(&TaskId(2)), expected);
        assert_eq!(t.group_ids(&TaskId(9)), None);
    }

    #[test]
    fn release_task_frees_each_value_once() {
        let map = fresh_map();
        let leader_nr = map.alloc().unwrap();
        let thread_nr = map.alloc().unwrap();
        let mut t = table();
        let leader = TaskPids::uniform(leader_nr);
        t.attach_task(TaskId(1), &leader);
        t.attach_task(
            TaskId(2),
            &TaskPids {
                pid: thread_nr,
                ..leader
            },
        );

        t.release_task(&TaskId(2), &map);
        assert!(!map.is_allocated(thread_nr));
        assert!(map.is_allocated(leader_nr));

        t.release_task(&TaskId(1), &map);
        assert!(!map.is_allocated(leader_nr));
        assert!(t.links.is_empty());
    }

    #[test]
    fn boot_value_is_never_freed() {
        let map = fresh_map();
        let mut t = table();
        t.attach_task(TaskId(0), &TaskPids::uniform(Pid::BOOT));
        t.release_task(&TaskId(0), &map);
        assert!(map.is_allocated(Pid::BOOT));
    }

    #[test]
    fn switch_exec_pids_swaps_identities() {
        let mut t = table();
        let (leader, thread, sibling) = (TaskId(1), TaskId(2), TaskId(3));
        let group = TaskPids {
            pid: Pid::new(500),
            tgid: Pid::new(500),
            pgid: Pid::new(450),
            sid: Pid::new(400),
        };
        t.attach_task(leader, &group);
        t.attach_task(
            thread,
            &TaskPids {
                pid: Pid::new(501),
                ..group
            },
        );
        t.attach_task(
            sibling,
            &TaskPids {
                pid: Pid::new(502),
                ..group
            },
        );

        t.switch_exec_pids(&leader, &thread);

        // The exec'ing thread now answers to the group id on every axis.
        assert_eq!(t.lookup(PidType::Pid, Pid::new(500)), Some(&thread));
        assert_eq!(t.pid_of(&thread, PidType::Tgid), Some(Pid::new(500)));
        assert_eq!(t.pid_of(&thread, PidType::Pgid), Some(Pid::new(450)));
        assert_eq!(t.pid_of(&thread, PidType::Sid), Some(Pid::new(400)));

        // The old leader took the thread's former pid.
        assert_eq!(t.lookup(PidType::Pid, Pid::new(501)), Some(&leader));
        assert_eq!(t.pid_of(&leader, PidType::Tgid), Some(Pid::new(501)));
        assert_eq!(t.lookup(PidType::Tgid, Pid::new(501)), Some(&leader));
        assert_eq!(t.pid_of(&leader, PidType::Pgid), Some(Pid::new(450)));

        // The untouched sibling still resolves through the group id.
        let members: Vec<_> = t.owners(PidType::Tgid, Pid::new(500)).copied().collect();
        assert_eq!(members, [sibling, thread]);
        assert_eq!(t.lookup(PidType::Pid, Pid::new(502)), Some(&sibling));
    }
}
