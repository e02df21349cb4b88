//! Pid value allocator.
//!
//! The value space `[0, PID_MAX_LIMIT)` is split into 4 KiB bitmap pages;
//! a set bit means the value is in use. Pages are installed on first use
//! and never freed while the map lives. Each page slot keeps a free count
//! so full pages are skipped without scanning their bits.
//!
//! Allocation is round-robin: the scan starts just past the last value
//! handed out and, on reaching `pid_max`, wraps to [`RESERVED_PIDS`]. A
//! freed value is therefore only reused once the cursor comes around again.

use alloc::boxed::Box;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicU64, Ordering};

use hadron_sync::sync::SpinLock;
use hadron_sync::{kdebug, kinfo, kwarn};

use crate::config::{BITS_PER_PAGE, PID_MAX_DEFAULT, PID_MAX_LIMIT, PID_MAX_MIN, PIDMAP_ENTRIES, RESERVED_PIDS};
use crate::error::PidError;
use crate::id::Pid;

const WORDS_PER_PAGE: usize = BITS_PER_PAGE as usize / 64;

/// One page of allocation bits.
struct Bitmap {
    words: [AtomicU64; WORDS_PER_PAGE],
}

impl Bitmap {
    fn new_boxed() -> Box<Self> {
        Box::new(Self {
            words: [const { AtomicU64::new(0) }; WORDS_PER_PAGE],
        })
    }

    #[inline]
    fn split(bit: u32) -> (usize, u64) {
        ((bit / 64) as usize, 1u64 << (bit % 64))
    }

    /// Sets `bit`, returning its previous state.
    fn test_and_set(&self, bit: u32) -> bool {
        let (word, mask) = Self::split(bit);
        self.words[word].fetch_or(mask, Ordering::AcqRel) & mask != 0
    }

    /// Clears `bit`, returning its previous state.
    fn test_and_clear(&self, bit: u32) -> bool {
        let (word, mask) = Self::split(bit);
        self.words[word].fetch_and(!mask, Ordering::AcqRel) & mask != 0
    }

    fn test(&self, bit: u32) -> bool {
        let (word, mask) = Self::split(bit);
        self.words[word].load(Ordering::Acquire) & mask != 0
    }

    /// Returns the first clear bit at or after `from`, or `BITS_PER_PAGE`.
    #[allow(clippy::cast_possible_truncation)]
    fn find_next_zero(&self, from: u32) -> u32 {
        let mut bit = from;
        while bit < BITS_PER_PAGE {
            let word = (bit / 64) as usize;
            let free = !self.words[word].load(Ordering::Relaxed) & (!0u64 << (bit % 64));
            if free != 0 {
                return word as u32 * 64 + free.trailing_zeros();
            }
            bit = (word as u32 + 1) * 64;
        }
        BITS_PER_PAGE
    }
}

/// A page slot: free count plus the lazily installed page.
struct PidMapPage {
    nr_free: AtomicU32,
    page: AtomicPtr<Bitmap>,
}

impl PidMapPage {
    const fn new() -> Self {
        Self {
            nr_free: AtomicU32::new(BITS_PER_PAGE),
            page: AtomicPtr::new(ptr::null_mut()),
        }
    }

    fn bitmap(&self) -> Option<&Bitmap> {
        // SAFETY: Non-null pointers come from `Box::into_raw` and stay valid
        // until the map is dropped.
        unsafe { self.page.load(Ordering::Acquire).as_ref() }
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn mk_pid(map: usize, offset: u32) -> u32 {
    map as u32 * BITS_PER_PAGE + offset
}

/// The pid allocator.
///
/// Lock-free except for page installation, which double-checks under a
/// small spin lock and discards the losing page.
pub struct PidMap {
    pages: [PidMapPage; PIDMAP_ENTRIES],
    last_pid: AtomicU32,
    pid_max: AtomicU32,
    initialized: AtomicBool,
    install_lock: SpinLock<()>,
}

impl PidMap {
    /// Creates an empty allocator with no pages and the default `pid_max`.
    pub const fn new() -> Self {
        Self {
            pages: [const { PidMapPage::new() }; PIDMAP_ENTRIES],
            last_pid: AtomicU32::new(0),
            pid_max: AtomicU32::new(PID_MAX_DEFAULT),
            initialized: AtomicBool::new(false),
            install_lock: SpinLock::new(()),
        }
    }

    /// Installs the first page, claims value 0 for the bootstrap context
    /// and positions the cursor so the next allocation returns
    /// [`RESERVED_PIDS`].
    ///
    /// # Errors
    ///
    /// Returns [`PidError::AlreadyInitialized`] on a second call.
    pub fn init(&self) -> Result<Pid, PidError> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Err(PidError::AlreadyInitialized);
        }
        self.claim(Pid::BOOT)?;
        self.last_pid.store(RESERVED_PIDS - 1, Ordering::Relaxed);
        Ok(Pid::BOOT)
    }

    /// Allocates the next free value after the last one handed out.
    ///
    /// # Errors
    ///
    /// Returns [`PidError::Exhausted`] if a full pass over
    /// `[RESERVED_PIDS, pid_max)` finds nothing free.
    pub fn alloc(&self) -> Result<Pid, PidError> {
        let pid_max = self.pid_max();
        let last = self.last_pid.load(Ordering::Relaxed);

        let mut pid = last + 1;
        if pid >= pid_max {
            pid = RESERVED_PIDS;
        }
        let mut map = (pid / BITS_PER_PAGE) as usize;
        let mut offset = pid % BITS_PER_PAGE;
        let last_map = ((pid_max - 1) / BITS_PER_PAGE) as usize;
        // Starting mid-page means the starting page is visited twice.
        let max_scan = pid_max.div_ceil(BITS_PER_PAGE) - u32::from(offset == 0);

        for i in 0..=max_scan {
            let slot = &self.pages[map];
            let page = self.page_or_install(map);

            if slot.nr_free.load(Ordering::Relaxed) != 0 {
                loop {
                    if !page.test_and_set(offset) {
                        slot.nr_free.fetch_sub(1, Ordering::Relaxed);
                        self.last_pid.store(pid, Ordering::Relaxed);
                        return Ok(Pid::new(pid));
                    }
                    offset = page.find_next_zero(offset);
                    pid = mk_pid(map, offset);
                    // On the final pass over the starting page, stop before
                    // reaching values the first pass already covered.
                    let in_bounds = offset < BITS_PER_PAGE && pid < pid_max;
                    let unscanned = i != max_scan || pid < last || (last + 1) % BITS_PER_PAGE == 0;
                    if !(in_bounds && unscanned) {
                        break;
                    }
                }
            }

            if map < last_map {
                map += 1;
                offset = 0;
            } else {
                map = 0;
                offset = RESERVED_PIDS;
            }
            pid = mk_pid(map, offset);
        }

        kwarn!("pidmap: no free pid below {}", pid_max);
        Err(PidError::Exhausted)
    }

    /// Returns `pid` to the free pool.
    ///
    /// # Panics
    ///
    /// Panics if `pid` is not currently allocated.
    pub fn free(&self, pid: Pid) {
        let nr = pid.as_u32();
        let slot = &self.pages[(nr / BITS_PER_PAGE) as usize % PIDMAP_ENTRIES];
        let cleared = nr < PID_MAX_LIMIT
            && slot
                .bitmap()
                .is_some_and(|page| page.test_and_clear(nr % BITS_PER_PAGE));
        assert!(cleared, "pidmap: freeing pid {pid} which is not allocated");
        slot.nr_free.fetch_add(1, Ordering::Relaxed);
    }

    /// Claims a specific value inside the reserved range, such as the pid
    /// of the first user process.
    ///
    /// # Errors
    ///
    /// Returns [`PidError::OutOfRange`] for values at or above
    /// [`RESERVED_PIDS`] and [`PidError::AlreadyAllocated`] if the value is
    /// taken.
    pub fn reserve(&self, pid: Pid) -> Result<(), PidError> {
        if pid.as_u32() >= RESERVED_PIDS {
            return Err(PidError::OutOfRange(pid));
        }
        self.claim(pid)
    }

    /// Returns `true` if `pid` is currently allocated.
    pub fn is_allocated(&self, pid: Pid) -> bool {
        let nr = pid.as_u32();
        nr < PID_MAX_LIMIT
            && self.pages[(nr / BITS_PER_PAGE) as usize]
                .bitmap()
                .is_some_and(|page| page.test(nr % BITS_PER_PAGE))
    }

    /// Current upper bound (exclusive) on allocated values.
    pub fn pid_max(&self) -> u32 {
        self.pid_max.load(Ordering::Relaxed)
    }

    /// Retunes `pid_max`. Values already handed out above the new bound
    /// stay valid until freed.
    ///
    /// # Errors
    ///
    /// Returns [`PidError::InvalidPidMax`] if `pid_max` is outside
    /// `[PID_MAX_MIN, PID_MAX_LIMIT]`.
    pub fn set_pid_max(&self, pid_max: u32) -> Result<(), PidError> {
        if !(PID_MAX_MIN..=PID_MAX_LIMIT).contains(&pid_max) {
            return Err(PidError::InvalidPidMax { requested: pid_max });
        }
        let old = self.pid_max.swap(pid_max, Ordering::Relaxed);
        if old != pid_max {
            kinfo!("pidmap: pid_max {} -> {}", old, pid_max);
        }
        Ok(())
    }

    /// The value most recently handed out by [`alloc`](Self::alloc).
    pub fn last_pid(&self) -> Pid {
        Pid::new(self.last_pid.load(Ordering::Relaxed))
    }

    fn claim(&self, pid: Pid) -> Result<(), PidError> {
        let nr = pid.as_u32();
        let map = (nr / BITS_PER_PAGE) as usize;
        if self.page_or_install(map).test_and_set(nr % BITS_PER_PAGE) {
            return Err(PidError::AlreadyAllocated(pid));
        }
        self.pages[map].nr_free.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    fn page_or_install(&self, map: usize) -> &Bitmap {
        let slot = &self.pages[map];
        if let Some(page) = slot.bitmap() {
            return page;
        }

        let fresh = Box::into_raw(Bitmap::new_boxed());
        let _guard = self.install_lock.lock();
        let current = slot.page.load(Ordering::Acquire);
        let page = if current.is_null() {
            slot.page.store(fresh, Ordering::Release);
            kdebug!("pidmap: installed page {}", map);
            fresh
        } else {
            // SAFETY: `fresh` came from `Box::into_raw` above and was never
            // published.
            drop(unsafe { Box::from_raw(fresh) });
            current
        };
        // SAFETY: `page` is non-null and owned by the map until drop.
        unsafe { &*page }
    }
}

impl Default for PidMap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PidMap {
    fn drop(&mut self) {
        for slot in &mut self.pages {
            let page = *slot.page.get_mut();
            if !page.is_null() {
                // SAFETY: Installed pages come from `Box::into_raw` and are
                // exclusively ours here.
                drop(unsafe { Box::from_raw(page) });
            }
        }
    }
}
