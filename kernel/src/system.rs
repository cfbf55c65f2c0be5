use crate::config::BootConfig;
use crate::mem::{FrameAllocator, FramePool, PageTable, SoftPageTable};
use crate::swapping::{BackingStore, MemoryBackingStore, Pager};
use crate::sync::mutex::Mutex;
use crate::threading::context_switch::{ContextSwitch, Dispatch, NoSwitch};
use crate::threading::process::{Pid, Process, ProcessStatus};
use crate::threading::scheduling::SchedulingPolicy;
use crate::threading::Cpu;
use crate::timer::Clock;
use alloc::boxed::Box;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use kestrel_shared::logger;
use log::{info, warn};
use once_cell::race::OnceBox;

/// What the kernel needs from the machine it runs on.
pub struct Machine {
    pub frames: Box<dyn FrameAllocator>,
    pub store: Box<dyn BackingStore>,
    /// Builds an empty user page table.
    pub new_page_table: fn() -> Box<dyn PageTable>,
    pub switch: Box<dyn ContextSwitch + Send + Sync>,
    /// Where a newly created kernel thread starts running. It must call
    /// [`SystemState::thread_started`] before anything else.
    pub thread_entry: usize,
}

fn soft_page_table() -> Box<dyn PageTable> {
    Box::new(SoftPageTable::new())
}

impl Machine {
    /// A machine made of in-memory stand-ins, for running the kernel hosted.
    pub fn hosted(frames: usize) -> Self {
        Self {
            frames: Box::new(FramePool::new(frames)),
            store: Box::new(MemoryBackingStore::new()),
            new_page_table: soft_page_table,
            switch: Box::new(NoSwitch),
            thread_entry: 0,
        }
    }
}

const NO_INIT: usize = usize::MAX;

pub struct SystemState {
    pub config: BootConfig,
    pub machine: Machine,
    pub processes: Box<[Process]>,
    /// Parent slot of every process slot. Guards the parent relation as a
    /// whole, which is what `wait` and `exit` rendezvous on.
    pub wait_lock: Mutex<Box<[Option<usize>]>>,
    next_pid: Mutex<Pid>,
    pub clock: Clock,
    policy: AtomicU8,
    init_slot: AtomicUsize,
}

impl SystemState {
    pub fn new(config: BootConfig, machine: Machine) -> Self {
        let processes = (0..config.max_processes)
            .map(|slot| Process::new(slot, config.threads_per_process, (machine.new_page_table)()))
            .collect();
        Self {
            policy: AtomicU8::new(config.scheduling.index()),
            wait_lock: Mutex::new(alloc::vec![None; config.max_processes].into_boxed_slice()),
            config,
            machine,
            processes,
            next_pid: Mutex::new(1),
            clock: Clock::new(),
            init_slot: AtomicUsize::new(NO_INIT),
        }
    }

    /// The pager, configured for this boot.
    pub fn pager(&self) -> Pager<'_> {
        Pager {
            frames: &*self.machine.frames,
            store: &*self.machine.store,
            policy: self.config.replacement,
            quota: self.config.quota,
        }
    }

    pub fn process(&self, slot: usize) -> &Process {
        &self.processes[slot]
    }

    /// Issues the next pid that no process holds. The counter wraps, so pids
    /// of long-gone processes come round again.
    ///
    /// Takes every process lock in turn; the caller must hold none.
    pub(crate) fn allocate_pid(&self) -> Pid {
        let mut next_pid = self.next_pid.lock();
        for _ in 0..Pid::MAX {
            let pid = *next_pid;
            *next_pid = next_pid.wrapping_add(1).max(1);
            if !self.pid_in_use(pid) {
                return pid;
            }
        }
        fatal!("every pid is in use")
    }

    fn pid_in_use(&self, pid: Pid) -> bool {
        self.processes.iter().any(|process| {
            let inner = process.inner.lock();
            inner.status != ProcessStatus::Unused && inner.pid == pid
        })
    }

    pub fn init_slot(&self) -> Option<usize> {
        match self.init_slot.load(Ordering::Acquire) {
            NO_INIT => None,
            slot => Some(slot),
        }
    }

    pub(crate) fn set_init_slot(&self, slot: usize) {
        self.init_slot.store(slot, Ordering::Release);
    }

    pub fn scheduling_policy(&self) -> SchedulingPolicy {
        SchedulingPolicy::from_index(i32::from(self.policy.load(Ordering::Relaxed)))
            .unwrap_or(SchedulingPolicy::RoundRobin)
    }

    pub(crate) fn store_scheduling_policy(&self, policy: SchedulingPolicy) {
        self.policy.store(policy.index(), Ordering::Relaxed);
    }
}

static SYSTEM: OnceBox<SystemState> = OnceBox::new();

/// Makes `state` the system. Can only happen once.
pub fn install(state: SystemState) -> &'static SystemState {
    if SYSTEM.set(Box::new(state)).is_err() {
        fatal!("system state installed twice");
    }
    system()
}

pub fn system() -> &'static SystemState {
    SYSTEM.get().expect("System not initialized.")
}

/// Brings the kernel up on the boot hart: reads the configuration, starts
/// init from `init_image` and enters the scheduler for good.
pub fn boot(
    command_line: &str,
    machine: Machine,
    init_image: &[u8],
    dispatch: &mut dyn Dispatch,
) -> ! {
    let config = match BootConfig::parse(command_line) {
        Ok(config) => config,
        Err(error) => {
            let _ = logger::init(BootConfig::default().log_level);
            warn!("ignoring command line {command_line:?}: {error}");
            BootConfig::default()
        }
    };
    let _ = logger::init(config.log_level);
    info!(
        "booting with {} replacement, {:?} scheduling, quota {}",
        config.replacement, config.scheduling, config.quota
    );

    let system = install(SystemState::new(config, machine));
    if let Err(error) = system.user_init(init_image) {
        fatal!("could not start init: {error}");
    }

    let mut cpu = Cpu::new(0);
    system.run_scheduler(&mut cpu, dispatch)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::swapping::ReplacementPolicy;
    use crate::threading::ThreadRef;

    /// A small system on hosted stand-ins.
    pub(crate) fn test_system(configure: impl FnOnce(&mut BootConfig)) -> SystemState {
        let mut config = BootConfig {
            max_processes: 4,
            threads_per_process: 3,
            quota: 4,
            exempt: alloc::vec![1],
            ..BootConfig::default()
        };
        configure(&mut config);
        SystemState::new(config, Machine::hosted(64))
    }

    /// A hart that is running thread `thread` of process slot `process`.
    pub(crate) fn running_on(process: usize, thread: usize) -> Cpu {
        let mut cpu = Cpu::new(0);
        cpu.current = Some(ThreadRef { process, thread });
        cpu
    }

    #[test]
    fn pids_start_at_one() {
        let system = test_system(|_| {});
        assert_eq!(system.allocate_pid(), 1);
        assert_eq!(system.allocate_pid(), 2);
    }

    #[test]
    fn wrapped_pids_skip_live_processes() {
        let system = test_system(|_| {});
        system.user_init(b"init").expect("init starts");
        let init = running_on(0, 0);

        *system.next_pid.lock() = Pid::MAX;
        assert_eq!(system.fork(&init), Ok(Pid::MAX));
        let child = system.fork(&init).expect("forked");
        assert_eq!(child, 2);
        assert!(system.process(2).memory.lock().paged);
        assert_eq!(system.memsize(1), Ok(system.process(0).memory.lock().size));
    }

    #[test]
    fn pager_follows_config() {
        let system = test_system(|config| {
            config.replacement = ReplacementPolicy::Lapa;
            config.quota = 3;
        });
        let pager = system.pager();
        assert_eq!(pager.policy, ReplacementPolicy::Lapa);
        assert_eq!(pager.max_pages(), 6);
    }

    #[test]
    fn policy_starts_from_config() {
        let system = test_system(|config| config.scheduling = SchedulingPolicy::Cfs);
        assert_eq!(system.scheduling_policy(), SchedulingPolicy::Cfs);
        system.store_scheduling_policy(SchedulingPolicy::Priority);
        assert_eq!(system.scheduling_policy(), SchedulingPolicy::Priority);
        assert_eq!(system.init_slot(), None);
    }
}
