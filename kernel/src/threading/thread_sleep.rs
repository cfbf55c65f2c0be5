//! Giving up the hart: yielding, sleeping on a channel and waking sleepers.

use super::{
    process::Process,
    thread_control_block::{KernelThread, ThreadStatus},
    Channel, Cpu, ThreadRef,
};
use crate::{
    sync::mutex::{Mutex, MutexGuard},
    system::SystemState,
};
use core::sync::atomic::Ordering;

impl SystemState {
    /// The running thread's process and thread slot.
    pub fn current(&self, cpu: &Cpu) -> (&Process, usize) {
        let current = cpu.running();
        (&self.processes[current.process], current.thread)
    }

    /// Switches from the running thread back to this hart's scheduler. The
    /// caller holds the thread's lock and has already moved it out of the
    /// running state. Returns once the scheduler picks the thread again.
    pub(crate) fn sched(&self, cpu: &Cpu, thread: &mut MutexGuard<'_, KernelThread>) {
        if thread.status == ThreadStatus::Running {
            fatal!("kernel thread {} entered the scheduler still running", thread.tid);
        }
        self.machine.switch.switch(&mut thread.context, &cpu.context);
    }

    /// Gives up the hart for one round of scheduling.
    pub fn yield_cpu(&self, cpu: &Cpu) {
        let (process, slot) = self.current(cpu);
        let mut thread = process.thread(slot).lock();
        thread.status = ThreadStatus::Runnable;
        self.sched(cpu, &mut thread);
    }

    /// Marks the running thread asleep on `channel` and only then lets go of
    /// `condition`, so a waker that takes `condition` afterwards is sure to
    /// find the thread asleep.
    fn park<'a, T: ?Sized>(
        &self,
        cpu: &Cpu,
        channel: Channel,
        condition: MutexGuard<'a, T>,
    ) -> (MutexGuard<'_, KernelThread>, &'a Mutex<T>) {
        let (process, slot) = self.current(cpu);
        let mut thread = process.thread(slot).lock();
        let condition = MutexGuard::unlocked(condition);
        thread.channel = Some(channel);
        thread.status = ThreadStatus::Sleeping;
        (thread, condition)
    }

    /// Sleeps on `channel` until woken, giving up `condition` meanwhile and
    /// holding it again on return. Callers recheck their condition in a loop.
    pub fn sleep<'a, T: ?Sized>(
        &self,
        cpu: &Cpu,
        channel: Channel,
        condition: MutexGuard<'a, T>,
    ) -> MutexGuard<'a, T> {
        let (mut thread, condition) = self.park(cpu, channel, condition);
        self.sched(cpu, &mut thread);
        drop(thread);
        condition.lock()
    }

    /// Makes every thread sleeping on `channel` runnable. The thread doing
    /// the waking, if any, is passed as `current` and left alone.
    pub fn wakeup(&self, current: Option<ThreadRef>, channel: Channel) {
        for process in self.processes.iter() {
            for slot in 0..process.thread_count() {
                let this = ThreadRef {
                    process: process.slot,
                    thread: slot,
                };
                if current == Some(this) {
                    continue;
                }
                let mut thread = process.thread(slot).lock();
                if thread.status == ThreadStatus::Sleeping && thread.channel == Some(channel) {
                    self.make_runnable(process, slot, &mut thread);
                }
            }
        }
    }

    /// Hands a thread to the scheduler. Its priority accumulator starts at
    /// the lowest any other live thread has, so time spent not runnable
    /// neither helps nor hurts it.
    pub(crate) fn make_runnable(&self, process: &Process, slot: usize, thread: &mut KernelThread) {
        thread.status = ThreadStatus::Runnable;
        thread.channel = None;

        let skip = ThreadRef {
            process: process.slot,
            thread: slot,
        };
        let lowest = self
            .processes
            .iter()
            .flat_map(|other| {
                (0..other.thread_count()).map(move |index| {
                    (
                        ThreadRef {
                            process: other.slot,
                            thread: index,
                        },
                        other.stats(index),
                    )
                })
            })
            .filter(|(thread, stats)| *thread != skip && stats.is_live())
            .map(|(_, stats)| stats.accumulator.load(Ordering::Relaxed))
            .min()
            .unwrap_or(0);
        process.stats(slot).accumulator.store(lowest, Ordering::Relaxed);
    }

    /// Whether the running thread or its process has been killed.
    pub fn killed(&self, cpu: &Cpu) -> bool {
        let (process, slot) = self.current(cpu);
        let process_killed = process.inner.lock().killed;
        process_killed || process.thread(slot).lock().killed
    }
}

#[cfg(test)]
mod tests {
    use crate::system::tests::{running_on, test_system};
    use crate::threading::thread_control_block::ThreadStatus;
    use crate::threading::{Channel, ThreadRef};
    use core::sync::atomic::Ordering;

    #[test]
    fn sleeper_is_woken_by_channel() {
        let system = test_system(|_| {});
        let (process_slot, thread_slot) = system.allocate_process().expect("free slot");
        let process = system.process(process_slot);
        process.thread(thread_slot).lock().status = ThreadStatus::Running;
        let cpu = running_on(process_slot, thread_slot);

        let condition = crate::sync::mutex::Mutex::new(0u32);
        let guard = system.sleep(&cpu, Channel::of(&condition), condition.lock());
        drop(guard);
        assert!(!condition.is_locked());
        assert_eq!(process.thread(thread_slot).lock().status, ThreadStatus::Sleeping);

        system.wakeup(None, Channel::of(&1u8));
        assert_eq!(process.thread(thread_slot).lock().status, ThreadStatus::Sleeping);

        system.wakeup(None, Channel::of(&condition));
        let thread = process.thread(thread_slot).lock();
        assert_eq!(thread.status, ThreadStatus::Runnable);
        assert_eq!(thread.channel, None);
    }

    #[test]
    fn wakeup_skips_the_waker() {
        let system = test_system(|_| {});
        let (process_slot, thread_slot) = system.allocate_process().expect("free slot");
        let process = system.process(process_slot);
        let channel = Channel::of(process);
        {
            let mut thread = process.thread(thread_slot).lock();
            thread.status = ThreadStatus::Sleeping;
            thread.channel = Some(channel);
        }
        let me = ThreadRef {
            process: process_slot,
            thread: thread_slot,
        };
        system.wakeup(Some(me), channel);
        assert_eq!(process.thread(thread_slot).lock().status, ThreadStatus::Sleeping);
    }

    #[test]
    fn runnable_thread_catches_up_accumulator() {
        let system = test_system(|_| {});
        let (a, _) = system.allocate_process().expect("free slot");
        let (b, _) = system.allocate_process().expect("free slot");
        system.process(a).stats(0).accumulator.store(40, Ordering::Relaxed);
        system.process(b).stats(0).accumulator.store(7, Ordering::Relaxed);

        let process = system.process(b);
        let mut thread = process.thread(0).lock();
        system.make_runnable(process, 0, &mut thread);
        assert_eq!(process.stats(0).accumulator.load(Ordering::Relaxed), 40);
    }

    #[test]
    fn yield_leaves_thread_runnable() {
        let system = test_system(|_| {});
        let (process_slot, thread_slot) = system.allocate_process().expect("free slot");
        system.process(process_slot).thread(thread_slot).lock().status = ThreadStatus::Running;
        let cpu = running_on(process_slot, thread_slot);
        system.yield_cpu(&cpu);
        assert_eq!(
            system.process(process_slot).thread(thread_slot).lock().status,
            ThreadStatus::Runnable
        );
        assert!(!system.killed(&cpu));
    }
}
