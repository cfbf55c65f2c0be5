use super::{context_switch::Context, Channel};
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

pub type Tid = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadStatus {
    Unused,
    /// Allocated but not yet handed to the scheduler.
    Used,
    Runnable,
    Running,
    Sleeping,
    Zombie,
}

/// One schedulable context of a process. Lives in a fixed slot of its
/// process's thread table and is guarded by that slot's lock.
#[derive(Debug)]
pub struct KernelThread {
    pub tid: Tid,
    pub status: ThreadStatus,
    /// What the thread is sleeping on. Only meaningful while sleeping.
    pub channel: Option<Channel>,
    pub killed: bool,
    pub exit_code: i32,
    pub context: Context,
    /// Index of this thread's trap frame in the process's trap frame pool.
    pub trap_frame: Option<usize>,
    /// Top of the kernel stack. Fixed for the lifetime of the slot.
    pub kernel_stack: usize,
}

impl KernelThread {
    pub fn new(kernel_stack: usize) -> Self {
        Self {
            tid: 0,
            status: ThreadStatus::Unused,
            channel: None,
            killed: false,
            exit_code: 0,
            context: Context::default(),
            trap_frame: None,
            kernel_stack,
        }
    }

    /// Returns the slot to the unused state. The kernel stack stays.
    pub fn reset(&mut self) {
        *self = Self::new(self.kernel_stack);
    }

    pub fn is_live(&self) -> bool {
        !matches!(self.status, ThreadStatus::Unused | ThreadStatus::Zombie)
    }
}

pub const DEFAULT_PRIORITY: u32 = 5;
pub const PRIORITY_RANGE: core::ops::RangeInclusive<u32> = 1..=10;

/// CFS priorities 0 (high), 1 (normal) and 2 (low) scale run time by these
/// percentages.
pub const CFS_DECAY: [u64; 3] = [75, 100, 125];
pub const DEFAULT_CFS_PRIORITY: u8 = 1;

/// Per-thread scheduling statistics. Kept outside the thread lock so the
/// clock can account a tick to a thread that is running.
#[derive(Debug)]
pub struct SchedStats {
    pub live: AtomicBool,
    pub priority: AtomicU32,
    pub accumulator: AtomicU64,
    pub cfs_priority: AtomicU8,
    pub run_ticks: AtomicU64,
    pub sleep_ticks: AtomicU64,
    pub ready_ticks: AtomicU64,
}

/// What `get_cfs_stats` reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CfsStats {
    pub cfs_priority: u8,
    pub run_ticks: u64,
    pub sleep_ticks: u64,
    pub ready_ticks: u64,
    pub vruntime: u64,
}

impl CfsStats {
    pub fn vruntime(cfs_priority: u8, run_ticks: u64, sleep_ticks: u64, ready_ticks: u64) -> u64 {
        let total = run_ticks + sleep_ticks + ready_ticks;
        if total == 0 {
            return 0;
        }
        CFS_DECAY[usize::from(cfs_priority)] * run_ticks / total
    }
}

impl Default for SchedStats {
    fn default() -> Self {
        Self {
            live: AtomicBool::new(false),
            priority: AtomicU32::new(DEFAULT_PRIORITY),
            accumulator: AtomicU64::new(0),
            cfs_priority: AtomicU8::new(DEFAULT_CFS_PRIORITY),
            run_ticks: AtomicU64::new(0),
            sleep_ticks: AtomicU64::new(0),
            ready_ticks: AtomicU64::new(0),
        }
    }
}

impl SchedStats {
    /// Fresh statistics for a newly created thread, inheriting its creator's
    /// priorities.
    pub fn start(&self, priority: u32, cfs_priority: u8) {
        self.priority.store(priority, Ordering::Relaxed);
        self.cfs_priority.store(cfs_priority, Ordering::Relaxed);
        self.accumulator.store(0, Ordering::Relaxed);
        self.run_ticks.store(0, Ordering::Relaxed);
        self.sleep_ticks.store(0, Ordering::Relaxed);
        self.ready_ticks.store(0, Ordering::Relaxed);
        self.live.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        self.live.store(false, Ordering::Release);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn cfs(&self) -> CfsStats {
        let cfs_priority = self.cfs_priority.load(Ordering::Relaxed);
        let run_ticks = self.run_ticks.load(Ordering::Relaxed);
        let sleep_ticks = self.sleep_ticks.load(Ordering::Relaxed);
        let ready_ticks = self.ready_ticks.load(Ordering::Relaxed);
        CfsStats {
            cfs_priority,
            run_ticks,
            sleep_ticks,
            ready_ticks,
            vruntime: CfsStats::vruntime(cfs_priority, run_ticks, sleep_ticks, ready_ticks),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_keeps_kernel_stack() {
        let mut thread = KernelThread::new(0x3000);
        thread.tid = 4;
        thread.status = ThreadStatus::Zombie;
        thread.trap_frame = Some(1);
        thread.reset();
        assert_eq!(thread.status, ThreadStatus::Unused);
        assert_eq!(thread.trap_frame, None);
        assert_eq!(thread.tid, 0);
        assert_eq!(thread.kernel_stack, 0x3000);
    }

    #[test]
    fn vruntime_scales_by_decay() {
        assert_eq!(CfsStats::vruntime(1, 0, 0, 0), 0);
        assert_eq!(CfsStats::vruntime(1, 10, 10, 0), 50);
        assert_eq!(CfsStats::vruntime(0, 10, 10, 0), 37);
        assert_eq!(CfsStats::vruntime(2, 10, 0, 0), 125);
    }
}
