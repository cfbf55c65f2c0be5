//! Kernel threads within a process: creating, joining, killing and exiting
//! them.

use super::{
    context_switch::Context,
    process::{Process, ProcessStatus},
    thread_control_block::{KernelThread, ThreadStatus, Tid},
    Channel, Cpu, ThreadError,
};
use crate::{sync::mutex::MutexGuard, system::SystemState};
use core::sync::atomic::Ordering;
use log::{debug, trace, warn};

impl Process {
    /// Claims an unused thread slot. The thread comes back locked and in the
    /// used state, set up to start at `entry` on its own kernel stack; the
    /// caller fills in its trap frame and hands it to the scheduler.
    pub fn create_thread(
        &self,
        entry: usize,
    ) -> Result<(usize, MutexGuard<'_, KernelThread>), ThreadError> {
        for slot in 0..self.thread_count() {
            let mut thread = self.thread(slot).lock();
            if thread.status != ThreadStatus::Unused {
                continue;
            }
            let Some(tid) = self.allocate_tid() else {
                warn!("process slot {} has used up its kids", self.slot);
                return Err(ThreadError::NoFreeSlot);
            };
            thread.tid = tid;
            thread.status = ThreadStatus::Used;
            thread.channel = None;
            thread.killed = false;
            thread.exit_code = 0;
            thread.trap_frame = Some(slot);
            thread.context = Context {
                ra: entry,
                sp: thread.kernel_stack,
                ..Context::default()
            };
            return Ok((slot, thread));
        }
        Err(ThreadError::NoFreeSlot)
    }

    /// Returns a thread slot to the unused state.
    pub fn free_thread(&self, slot: usize, thread: &mut KernelThread) {
        self.stats(slot).stop();
        thread.reset();
    }

    /// Finds the live or exited thread with `tid`.
    fn find_thread(&self, tid: Tid) -> Option<(usize, MutexGuard<'_, KernelThread>)> {
        (0..self.thread_count()).find_map(|slot| {
            let thread = self.thread(slot).lock();
            (thread.tid == tid && thread.status != ThreadStatus::Unused).then_some((slot, thread))
        })
    }

    /// Whether some thread of this process is on a hart right now.
    pub fn any_running(&self) -> bool {
        (0..self.thread_count())
            .any(|slot| self.thread(slot).lock().status == ThreadStatus::Running)
    }
}

enum Join {
    Exited(i32),
    Pending(usize),
}

impl SystemState {
    /// Runs first on a new kernel thread, releasing the lock the scheduler
    /// dispatched it with.
    pub fn thread_started(&self, cpu: &Cpu) {
        let (process, slot) = self.current(cpu);
        // SAFETY: The scheduler locked this thread to dispatch it and left the
        // lock for the thread to release.
        drop(unsafe { process.thread(slot).adopt() });
    }

    /// Starts a new kernel thread in the caller's process, running user code
    /// at `start` on the stack `stack..stack + stack_size`.
    pub fn kthread_create(
        &self,
        cpu: &Cpu,
        start: usize,
        stack: usize,
        stack_size: usize,
    ) -> Result<Tid, ThreadError> {
        let stack_top = stack
            .checked_add(stack_size)
            .ok_or(ThreadError::InvalidArgument)?;
        let (process, caller) = self.current(cpu);
        let pid = process.pid();
        let mut frame = *process.trap_frame(caller).lock();
        frame.epc = start;
        frame.set_sp(stack_top);

        let (slot, mut thread) = process.create_thread(self.machine.thread_entry)?;
        *process.trap_frame(slot).lock() = frame;
        let caller_stats = process.stats(caller);
        process.stats(slot).start(
            caller_stats.priority.load(Ordering::Relaxed),
            caller_stats.cfs_priority.load(Ordering::Relaxed),
        );
        let tid = thread.tid;
        self.make_runnable(process, slot, &mut thread);
        debug!("pid {pid} started kernel thread {tid}");
        Ok(tid)
    }

    pub fn kthread_id(&self, cpu: &Cpu) -> Tid {
        let (process, slot) = self.current(cpu);
        process.thread(slot).lock().tid
    }

    /// Asks a thread of the caller's process to exit.
    pub fn kthread_kill(&self, cpu: &Cpu, tid: Tid) -> Result<(), ThreadError> {
        let (process, _) = self.current(cpu);
        let (slot, mut thread) = process.find_thread(tid).ok_or(ThreadError::NoSuchThread)?;
        if thread.status == ThreadStatus::Zombie {
            return Err(ThreadError::NoSuchThread);
        }
        thread.killed = true;
        if thread.status == ThreadStatus::Sleeping {
            self.make_runnable(process, slot, &mut thread);
        }
        Ok(())
    }

    fn join_step(&self, process: &Process, tid: Tid) -> Result<Join, ThreadError> {
        let (slot, mut thread) = process.find_thread(tid).ok_or(ThreadError::NoSuchThread)?;
        if thread.status != ThreadStatus::Zombie {
            return Ok(Join::Pending(slot));
        }
        let code = thread.exit_code;
        process.free_thread(slot, &mut thread);
        trace!("reaped kernel thread {tid} in process slot {}", process.slot);
        Ok(Join::Exited(code))
    }

    /// Collects the exit code of thread `tid` of the caller's process if it
    /// has exited, freeing its slot. `None` means it is still alive.
    pub fn try_join(&self, cpu: &Cpu, tid: Tid) -> Result<Option<i32>, ThreadError> {
        let (process, _) = self.current(cpu);
        let _inner = process.inner.lock();
        match self.join_step(process, tid)? {
            Join::Exited(code) => Ok(Some(code)),
            Join::Pending(_) => Ok(None),
        }
    }

    /// Waits for thread `tid` of the caller's process to exit and returns its
    /// exit code.
    pub fn kthread_join(&self, cpu: &Cpu, tid: Tid) -> Result<i32, ThreadError> {
        let (process, me) = self.current(cpu);
        if process.thread(me).lock().tid == tid {
            return Err(ThreadError::InvalidArgument);
        }
        let mut inner = process.inner.lock();
        loop {
            let slot = match self.join_step(process, tid)? {
                Join::Exited(code) => return Ok(code),
                Join::Pending(slot) => slot,
            };
            if inner.killed || process.thread(me).lock().killed {
                return Err(ThreadError::Killed);
            }
            inner = self.sleep(cpu, Channel::of(process.thread(slot)), inner);
        }
    }

    /// Ends the running thread with `code`, waking anyone joining it. The
    /// last thread of a process to exit takes the process with it.
    ///
    /// Returns the thread, zombie and locked; the lock goes with it into the
    /// scheduler so no one can reap it while it is still on its stack.
    pub fn retire_thread(&self, cpu: &Cpu, code: i32) -> MutexGuard<'_, KernelThread> {
        let current = cpu.running();
        let (process, slot) = self.current(cpu);

        let parents = self.wait_lock.lock();
        let inner = process.inner.lock();
        process.stats(slot).stop();
        if inner.status != ProcessStatus::Zombie && !process.has_live_threads() {
            drop(inner);
            return self.retire_process_locked(cpu, parents, code, "");
        }

        self.wakeup(Some(current), Channel::of(process.thread(slot)));
        if inner.status == ProcessStatus::Zombie {
            // The parent may be waiting for the last of us to leave the hart.
            if let Some(parent) = parents[current.process] {
                self.wakeup(Some(current), Channel::of(self.process(parent)));
            }
        }
        let mut thread = process.thread(slot).lock();
        thread.exit_code = code;
        thread.status = ThreadStatus::Zombie;
        debug!("kernel thread {} of pid {} exited with {code}", thread.tid, inner.pid);
        thread
    }

    /// Switches away from a thread that has exited, for good.
    pub fn relinquish(&self, cpu: &Cpu, mut thread: MutexGuard<'_, KernelThread>) -> ! {
        self.sched(cpu, &mut thread);
        fatal!("kernel thread {} ran after exiting", thread.tid)
    }

    pub fn kthread_exit(&self, cpu: &Cpu, code: i32) -> ! {
        let thread = self.retire_thread(cpu, code);
        self.relinquish(cpu, thread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::tests::{running_on, test_system};

    #[test]
    fn create_fills_every_slot_then_fails() {
        let system = test_system(|config| config.threads_per_process = 3);
        let (slot, _) = system.allocate_process().expect("free slot");
        let process = system.process(slot);
        for expected in 1..3 {
            let (thread_slot, thread) = process.create_thread(0x1000).expect("free thread");
            assert_eq!(thread_slot, expected);
            assert_eq!(thread.status, ThreadStatus::Used);
            assert_eq!(thread.trap_frame, Some(expected));
            assert_eq!(thread.context.ra, 0x1000);
            assert_eq!(thread.context.sp, thread.kernel_stack);
        }
        assert_eq!(process.create_thread(0x1000).err(), Some(ThreadError::NoFreeSlot));
    }

    #[test]
    fn kids_are_not_reused_while_main_thread_lives() {
        let system = test_system(|config| config.threads_per_process = 2);
        let (slot, first) = system.allocate_process().expect("free slot");
        let process = system.process(slot);
        let main = running_on(slot, first);
        assert_eq!(system.kthread_id(&main), 1);

        *process.next_tid.lock() = Tid::MAX - 1;
        let last = system.kthread_create(&main, 0, 0, 0x1000).expect("created");
        assert_eq!(last, Tid::MAX - 1);
        {
            let mut thread = process.thread(1).lock();
            thread.status = ThreadStatus::Zombie;
        }
        assert_eq!(system.kthread_join(&main, last), Ok(0));

        assert_eq!(
            system.kthread_create(&main, 0, 0, 0x1000),
            Err(ThreadError::NoFreeSlot)
        );
        assert_eq!(process.thread(1).lock().status, ThreadStatus::Unused);
        assert_eq!(system.kthread_kill(&main, 1), Ok(()));
        assert!(process.thread(first).lock().killed);
    }

    #[test]
    fn kthread_create_copies_trap_frame() {
        let system = test_system(|_| {});
        let (slot, first) = system.allocate_process().expect("free slot");
        let process = system.process(slot);
        process.trap_frame(first).lock().set_a0(9);
        process.stats(first).priority.store(8, Ordering::Relaxed);
        let cpu = running_on(slot, first);

        let tid = system.kthread_create(&cpu, 0x400, 0x8000, 0x1000).expect("created");
        assert_eq!(tid, 2);
        let frame = *process.trap_frame(1).lock();
        assert_eq!(frame.epc, 0x400);
        assert_eq!(frame.sp(), 0x9000);
        assert_eq!(frame.a0(), 9);
        assert_eq!(process.thread(1).lock().status, ThreadStatus::Runnable);
        assert_eq!(process.stats(1).priority.load(Ordering::Relaxed), 8);

        assert_eq!(
            system.kthread_create(&cpu, 0, usize::MAX, 2).err(),
            Some(ThreadError::InvalidArgument)
        );
    }

    #[test]
    fn join_reaps_exited_thread_and_frees_slot() {
        let system = test_system(|config| config.threads_per_process = 2);
        let (slot, first) = system.allocate_process().expect("free slot");
        let main = running_on(slot, first);
        let tid = system.kthread_create(&main, 0, 0, 0x1000).expect("created");
        assert_eq!(system.try_join(&main, tid), Ok(None));

        let worker = running_on(slot, 1);
        system.process(slot).thread(1).lock().status = ThreadStatus::Running;
        drop(system.retire_thread(&worker, 17));
        assert_eq!(system.process(slot).inner.lock().status, ProcessStatus::Used);

        assert_eq!(system.kthread_join(&main, tid), Ok(17));
        assert_eq!(system.try_join(&main, tid), Err(ThreadError::NoSuchThread));
        let process = system.process(slot);
        assert!(process.create_thread(0).is_ok());
    }

    #[test]
    fn joining_yourself_is_refused() {
        let system = test_system(|_| {});
        let (slot, first) = system.allocate_process().expect("free slot");
        let cpu = running_on(slot, first);
        let me = system.kthread_id(&cpu);
        assert_eq!(system.kthread_join(&cpu, me), Err(ThreadError::InvalidArgument));
        assert_eq!(system.kthread_join(&cpu, 99), Err(ThreadError::NoSuchThread));
    }

    #[test]
    fn kill_wakes_a_sleeping_thread() {
        let system = test_system(|_| {});
        let (slot, first) = system.allocate_process().expect("free slot");
        let cpu = running_on(slot, first);
        let tid = system.kthread_create(&cpu, 0, 0, 0x1000).expect("created");
        {
            let mut thread = system.process(slot).thread(1).lock();
            thread.status = ThreadStatus::Sleeping;
            thread.channel = Some(Channel::of(&system.clock));
        }
        system.kthread_kill(&cpu, tid).expect("killed");
        let thread = system.process(slot).thread(1).lock();
        assert!(thread.killed);
        assert_eq!(thread.status, ThreadStatus::Runnable);
        drop(thread);
        assert_eq!(system.kthread_kill(&cpu, 42), Err(ThreadError::NoSuchThread));
    }
}
