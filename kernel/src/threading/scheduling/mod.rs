mod cfs_scheduler;
mod priority_scheduler;
mod scheduler;

pub use cfs_scheduler::CfsScheduler;
pub use priority_scheduler::PriorityScheduler;
pub use scheduler::{Candidate, Scheduler};

use super::{
    context_switch::Dispatch,
    process::{Pid, Process},
    thread_control_block::{CfsStats, KernelThread, SchedStats, ThreadStatus, PRIORITY_RANGE},
    Cpu, ThreadError, ThreadRef,
};
use crate::{sync::mutex::MutexGuard, system::SystemState};
use alloc::vec::Vec;
use core::sync::atomic::Ordering;
use log::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulingPolicy {
    /// Every runnable thread, in table order, once per pass.
    RoundRobin,
    Priority,
    Cfs,
}

impl SchedulingPolicy {
    /// Policies by the number user space selects them with.
    pub fn from_index(index: i32) -> Option<Self> {
        match index {
            0 => Some(SchedulingPolicy::RoundRobin),
            1 => Some(SchedulingPolicy::Priority),
            2 => Some(SchedulingPolicy::Cfs),
            _ => None,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            SchedulingPolicy::RoundRobin => 0,
            SchedulingPolicy::Priority => 1,
            SchedulingPolicy::Cfs => 2,
        }
    }

    fn scheduler(self) -> Option<&'static dyn Scheduler> {
        match self {
            SchedulingPolicy::RoundRobin => None,
            SchedulingPolicy::Priority => Some(&PriorityScheduler),
            SchedulingPolicy::Cfs => Some(&CfsScheduler),
        }
    }
}

impl SystemState {
    /// Runs one round of scheduling on this hart and returns how many threads
    /// it dispatched.
    pub fn scheduler_pass(&self, cpu: &mut Cpu, dispatch: &mut dyn Dispatch) -> usize {
        let Some(scheduler) = self.scheduling_policy().scheduler() else {
            return self.round_robin_pass(cpu, dispatch);
        };
        let Some(next) = scheduler.pick(&self.candidates()) else {
            return 0;
        };
        let process = self.process(next.process);
        let thread = process.thread(next.thread).lock();
        // Another hart may have taken it since the snapshot.
        if thread.status != ThreadStatus::Runnable {
            return 0;
        }
        self.run_thread(cpu, dispatch, process, next.thread, thread);
        1
    }

    fn round_robin_pass(&self, cpu: &mut Cpu, dispatch: &mut dyn Dispatch) -> usize {
        let mut dispatched = 0;
        for process in self.processes.iter() {
            for slot in 0..process.thread_count() {
                let thread = process.thread(slot).lock();
                if thread.status == ThreadStatus::Runnable {
                    self.run_thread(cpu, dispatch, process, slot, thread);
                    dispatched += 1;
                }
            }
        }
        dispatched
    }

    fn candidates(&self) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for process in self.processes.iter() {
            for slot in 0..process.thread_count() {
                if process.thread(slot).lock().status != ThreadStatus::Runnable {
                    continue;
                }
                let stats = process.stats(slot);
                candidates.push(Candidate {
                    thread: ThreadRef {
                        process: process.slot,
                        thread: slot,
                    },
                    accumulator: stats.accumulator.load(Ordering::Relaxed),
                    vruntime: stats.cfs().vruntime,
                });
            }
        }
        candidates
    }

    fn run_thread<'a>(
        &self,
        cpu: &mut Cpu,
        dispatch: &mut dyn Dispatch,
        process: &'a Process,
        slot: usize,
        mut thread: MutexGuard<'a, KernelThread>,
    ) {
        thread.status = ThreadStatus::Running;
        cpu.current = Some(ThreadRef {
            process: process.slot,
            thread: slot,
        });
        let thread = dispatch.run(cpu, process, thread);
        cpu.current = None;

        if self.scheduling_policy() == SchedulingPolicy::Priority {
            let stats = process.stats(slot);
            let priority = u64::from(stats.priority.load(Ordering::Relaxed));
            stats.accumulator.fetch_add(priority, Ordering::Relaxed);
        }
        self.pager().age(&mut process.memory.lock());
        drop(thread);
    }

    /// The scheduler loop of one hart.
    pub fn run_scheduler(&self, cpu: &mut Cpu, dispatch: &mut dyn Dispatch) -> ! {
        debug!("hart {} entering the scheduler", cpu.id);
        loop {
            if self.scheduler_pass(cpu, dispatch) == 0 {
                core::hint::spin_loop();
            }
        }
    }

    pub fn set_policy(&self, index: i32) -> Result<(), ThreadError> {
        let policy = SchedulingPolicy::from_index(index).ok_or(ThreadError::InvalidArgument)?;
        self.store_scheduling_policy(policy);
        debug!("scheduling policy is now {policy:?}");
        Ok(())
    }

    /// Sets the running thread's priority, from 1 (most urgent) to 10.
    pub fn set_ps_priority(&self, cpu: &Cpu, priority: u32) -> Result<(), ThreadError> {
        if !PRIORITY_RANGE.contains(&priority) {
            return Err(ThreadError::InvalidArgument);
        }
        let (process, slot) = self.current(cpu);
        process.stats(slot).priority.store(priority, Ordering::Relaxed);
        Ok(())
    }

    /// Sets the running thread's CFS priority: 0 high, 1 normal, 2 low.
    pub fn set_cfs_priority(&self, cpu: &Cpu, priority: u8) -> Result<(), ThreadError> {
        if priority > 2 {
            return Err(ThreadError::InvalidArgument);
        }
        let (process, slot) = self.current(cpu);
        process.stats(slot).cfs_priority.store(priority, Ordering::Relaxed);
        Ok(())
    }

    /// CFS statistics of the first live thread of process `pid`.
    pub fn cfs_stats(&self, pid: Pid) -> Result<CfsStats, ThreadError> {
        let (process, _inner) = self.find_process(pid).ok_or(ThreadError::NoSuchProcess)?;
        (0..process.thread_count())
            .map(|slot| process.stats(slot))
            .find(|stats| stats.is_live())
            .map(SchedStats::cfs)
            .ok_or(ThreadError::NoSuchThread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::PAGE_FRAME_SIZE;
    use crate::swapping::ReplacementPolicy;
    use crate::sync::mutex::Mutex;
    use crate::system::tests::{running_on, test_system};
    use crate::threading::context_switch::SimulatedDispatch;
    use crate::threading::Channel;
    use alloc::vec;

    #[test]
    fn round_robin_runs_every_runnable_thread_in_order() {
        let system = test_system(|_| {});
        system.user_init(b"init").expect("init starts");
        let cpu = running_on(0, 0);
        system.fork(&cpu).expect("forked");
        system.kthread_create(&cpu, 0, 0, 0x100).expect("thread");

        let mut order = Vec::new();
        let mut dispatch = SimulatedDispatch(|cpu: &mut Cpu, process: &Process, slot: usize| {
            assert_eq!(cpu.running(), ThreadRef { process: process.slot, thread: slot });
            order.push((process.slot, slot));
        });
        let mut hart = Cpu::new(0);
        assert_eq!(system.scheduler_pass(&mut hart, &mut dispatch), 3);
        drop(dispatch);
        assert_eq!(order, vec![(0, 0), (0, 1), (1, 0)]);
        assert_eq!(hart.current, None);
        assert_eq!(system.process(1).thread(0).lock().status, ThreadStatus::Runnable);
    }

    #[test]
    fn sleeping_threads_are_skipped_until_woken() {
        let system = test_system(|_| {});
        system.user_init(b"init").expect("init starts");
        let gate = Mutex::new(());
        let channel = Channel::of(&gate);

        let mut runs = 0;
        let mut dispatch = SimulatedDispatch(|cpu: &mut Cpu, _: &Process, _: usize| {
            runs += 1;
            drop(system.sleep(cpu, channel, gate.lock()));
        });
        let mut hart = Cpu::new(0);
        assert_eq!(system.scheduler_pass(&mut hart, &mut dispatch), 1);
        assert_eq!(system.process(0).thread(0).lock().status, ThreadStatus::Sleeping);
        assert_eq!(system.scheduler_pass(&mut hart, &mut dispatch), 0);

        system.wakeup(None, channel);
        assert_eq!(system.scheduler_pass(&mut hart, &mut dispatch), 1);
        drop(dispatch);
        assert_eq!(runs, 2);
    }

    #[test]
    fn priority_runs_lowest_accumulator_and_charges_it() {
        let system = test_system(|config| config.scheduling = SchedulingPolicy::Priority);
        system.user_init(b"init").expect("init starts");
        let init = running_on(0, 0);
        system.fork(&init).expect("forked");
        system.process(0).stats(0).accumulator.store(50, Ordering::Relaxed);
        system.process(1).stats(0).accumulator.store(20, Ordering::Relaxed);
        system.set_ps_priority(&running_on(1, 0), 7).expect("valid priority");

        let mut ran = Vec::new();
        let mut dispatch = SimulatedDispatch(|_: &mut Cpu, process: &Process, _: usize| {
            ran.push(process.slot);
        });
        let mut hart = Cpu::new(0);
        assert_eq!(system.scheduler_pass(&mut hart, &mut dispatch), 1);
        assert_eq!(system.process(1).stats(0).accumulator.load(Ordering::Relaxed), 27);
        for _ in 0..4 {
            system.scheduler_pass(&mut hart, &mut dispatch);
        }
        drop(dispatch);
        // 20, 27, 34, 41, 48 all stay below 50.
        assert_eq!(ran, vec![1; 5]);
    }

    #[test]
    fn cfs_runs_least_vruntime() {
        let system = test_system(|config| config.scheduling = SchedulingPolicy::Cfs);
        system.user_init(b"init").expect("init starts");
        let init = running_on(0, 0);
        system.fork(&init).expect("forked");
        system.process(0).stats(0).run_ticks.store(10, Ordering::Relaxed);
        system.process(1).stats(0).run_ticks.store(10, Ordering::Relaxed);
        system.process(1).stats(0).sleep_ticks.store(30, Ordering::Relaxed);

        let mut ran = Vec::new();
        let mut dispatch = SimulatedDispatch(|_: &mut Cpu, process: &Process, _: usize| {
            ran.push(process.slot);
        });
        system.scheduler_pass(&mut Cpu::new(0), &mut dispatch);
        drop(dispatch);
        assert_eq!(ran, vec![1]);
        assert_eq!(system.cfs_stats(2).map(|stats| stats.vruntime), Ok(25));
    }

    #[test]
    fn pass_ages_resident_pages() {
        let system = test_system(|config| {
            config.replacement = ReplacementPolicy::Nfua;
            config.exempt = vec![];
        });
        system.user_init(b"init").expect("init starts");

        let mut dispatch = SimulatedDispatch(|_: &mut Cpu, process: &Process, _: usize| {
            let pid = process.pid();
            let mut memory = process.memory.lock();
            memory
                .access(&system.pager(), pid, PAGE_FRAME_SIZE, false)
                .expect("stack page");
        });
        system.scheduler_pass(&mut Cpu::new(0), &mut dispatch);
        drop(dispatch);

        let memory = system.process(0).memory.lock();
        let state = memory.paging.as_ref().expect("paging state");
        let stack = state.resident_slot(PAGE_FRAME_SIZE).expect("resident");
        assert_eq!(state.resident()[stack].age, 1 << 31);
    }

    #[test]
    fn exiting_child_is_collected_by_waiting_parent() {
        let system = test_system(|_| {});
        system.user_init(b"init").expect("init starts");
        system.fork(&running_on(0, 0)).expect("forked");

        let mut collected = None;
        let mut dispatch = SimulatedDispatch(|cpu: &mut Cpu, process: &Process, _: usize| {
            if process.slot == 1 {
                drop(system.retire_process(cpu, 4, "bye"));
            } else if let Ok(Some(report)) = system.try_wait(cpu) {
                collected = Some(report);
            }
        });
        let mut hart = Cpu::new(0);
        system.scheduler_pass(&mut hart, &mut dispatch);
        system.scheduler_pass(&mut hart, &mut dispatch);
        drop(dispatch);
        let report = collected.expect("child collected");
        assert_eq!((report.pid, report.status, report.message.as_str()), (2, 4, "bye"));
    }

    #[test]
    fn policy_and_priorities_are_validated() {
        let system = test_system(|_| {});
        system.user_init(b"init").expect("init starts");
        let cpu = running_on(0, 0);
        assert_eq!(system.set_policy(3), Err(ThreadError::InvalidArgument));
        assert_eq!(system.set_policy(2), Ok(()));
        assert_eq!(system.scheduling_policy(), SchedulingPolicy::Cfs);
        assert_eq!(system.set_ps_priority(&cpu, 0), Err(ThreadError::InvalidArgument));
        assert_eq!(system.set_ps_priority(&cpu, 11), Err(ThreadError::InvalidArgument));
        assert_eq!(system.set_cfs_priority(&cpu, 3), Err(ThreadError::InvalidArgument));
        assert_eq!(system.set_cfs_priority(&cpu, 0), Ok(()));
        assert_eq!(system.cfs_stats(1).map(|stats| stats.cfs_priority), Ok(0));
        assert_eq!(system.cfs_stats(5), Err(ThreadError::NoSuchProcess));
    }
}
