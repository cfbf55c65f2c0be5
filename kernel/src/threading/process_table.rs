//! The process table: creating processes, forking, exiting, waiting, and
//! the per-process memory calls.

use super::{
    process::{truncate_exit_message, Pid, Process, ProcessInner, ProcessStatus},
    thread_control_block::{KernelThread, ThreadStatus, DEFAULT_CFS_PRIORITY, DEFAULT_PRIORITY},
    Channel, Cpu, ThreadError,
};
use crate::{
    mem::{page_round_up, AddressSpace, PAGE_FRAME_SIZE},
    swapping::SwapError,
    sync::mutex::MutexGuard,
    system::SystemState,
};
use alloc::{boxed::Box, string::String};
use core::sync::atomic::Ordering;
use kestrel_shared::mem::trap_frame_address;
use log::{debug, info, warn};

/// What a parent learns about a child it waited for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExitReport {
    pub pid: Pid,
    pub status: i32,
    pub message: String,
}

impl SystemState {
    /// Claims an unused process slot with a fresh pid and an empty address
    /// space, and creates its first kernel thread. The thread is left in the
    /// used state for the caller to finish setting up.
    ///
    /// Returns the process slot and the thread slot.
    pub fn allocate_process(&self) -> Result<(usize, usize), ThreadError> {
        for process in self.processes.iter() {
            let mut inner = process.inner.lock();
            if inner.status != ProcessStatus::Unused {
                continue;
            }
            // Claimed with pid 0, which is never issued, while the pid is
            // chosen with no process lock held.
            *inner = ProcessInner::new();
            inner.status = ProcessStatus::Used;
            drop(inner);
            let pid = self.allocate_pid();
            process.inner.lock().pid = pid;

            *process.memory.lock() =
                AddressSpace::new((self.machine.new_page_table)(), self.config.is_paged(pid));
            process.reset_tids();

            let Ok((slot, _thread)) = process.create_thread(self.machine.thread_entry) else {
                fatal!("unused process slot {} has no free thread slot", process.slot);
            };
            process.stats(slot).start(DEFAULT_PRIORITY, DEFAULT_CFS_PRIORITY);
            debug!("allocated pid {pid} in slot {}", process.slot);
            return Ok((process.slot, slot));
        }
        warn!("process table is full");
        Err(ThreadError::NoFreeSlot)
    }

    /// Returns a process slot, with its threads and memory, to the unused
    /// state. Its parent link must already be gone.
    pub(crate) fn free_process(&self, slot: usize) {
        let process = self.process(slot);
        let mut inner = process.inner.lock();
        for thread_slot in 0..process.thread_count() {
            let mut thread = process.thread(thread_slot).lock();
            process.free_thread(thread_slot, &mut thread);
        }
        process.memory.lock().free(&self.pager(), inner.pid);
        *inner = ProcessInner::new();
    }

    fn load_image(&self, process: &Process, pid: Pid, image: &[u8], size: usize) -> Result<(), SwapError> {
        let pager = self.pager();
        let mut memory = process.memory.lock();
        memory.grow(&pager, pid, size)?;
        memory.write_bytes(&pager, pid, 0, image)
    }

    /// Starts the first user process from `image`, loaded at address zero
    /// with one page of stack above it.
    pub fn user_init(&self, image: &[u8]) -> Result<Pid, ThreadError> {
        let (slot, thread_slot) = self.allocate_process()?;
        let process = self.process(slot);
        let pid = process.pid();
        let stack_top = page_round_up(image.len()) + PAGE_FRAME_SIZE;
        if let Err(error) = self.load_image(process, pid, image, stack_top) {
            self.free_process(slot);
            return Err(error.into());
        }
        {
            let mut frame = process.trap_frame(thread_slot).lock();
            frame.epc = 0;
            frame.set_sp(stack_top);
        }
        self.set_init_slot(slot);

        let mut thread = process.thread(thread_slot).lock();
        self.make_runnable(process, thread_slot, &mut thread);
        info!("init is pid {pid}");
        Ok(pid)
    }

    fn copy_memory(&self, parent: &Process, child: &Process, child_pid: Pid) -> Result<(), SwapError> {
        let pager = self.pager();
        let mut parent_memory = parent.memory.lock();
        // The child is not reachable by anyone else yet.
        let mut child_memory = child.memory.lock();
        child_memory.paged |= parent_memory.paged;
        parent_memory.copy_into(&pager, &mut child_memory)?;
        pager.duplicate(&parent_memory, child_pid, &mut child_memory)
    }

    /// Creates a copy of the caller's process. The child's first thread
    /// resumes where the caller is, seeing 0 where the parent sees the
    /// child's pid.
    pub fn fork(&self, cpu: &Cpu) -> Result<Pid, ThreadError> {
        let (parent, caller) = self.current(cpu);
        let parent_pid = parent.pid();
        let (child_slot, child_thread) = self.allocate_process()?;
        let child = self.process(child_slot);
        let child_pid = child.pid();

        if let Err(error) = self.copy_memory(parent, child, child_pid) {
            warn!("fork of pid {parent_pid} failed: {error}");
            self.free_process(child_slot);
            return Err(error.into());
        }

        let mut frame = *parent.trap_frame(caller).lock();
        frame.set_a0(0);
        *child.trap_frame(child_thread).lock() = frame;
        let parent_stats = parent.stats(caller);
        child.stats(child_thread).start(
            parent_stats.priority.load(Ordering::Relaxed),
            parent_stats.cfs_priority.load(Ordering::Relaxed),
        );

        self.wait_lock.lock()[child_slot] = Some(parent.slot);

        let mut thread = child.thread(child_thread).lock();
        self.make_runnable(child, child_thread, &mut thread);
        debug!("pid {parent_pid} forked pid {child_pid}");
        Ok(child_pid)
    }

    /// Ends the caller's process: kills its other threads, hands its children
    /// to init and leaves the exit status for the parent. Memory and the swap
    /// file stay until the parent reaps the process, since the other threads
    /// may still be in the kernel touching them.
    ///
    /// Returns the calling thread, zombie and locked, for
    /// [`relinquish`](Self::relinquish).
    pub fn retire_process(&self, cpu: &Cpu, status: i32, message: &str) -> MutexGuard<'_, KernelThread> {
        let (process, me) = self.current(cpu);
        for slot in (0..process.thread_count()).filter(|&slot| slot != me) {
            let mut thread = process.thread(slot).lock();
            if thread.is_live() {
                thread.killed = true;
                if thread.status == ThreadStatus::Sleeping {
                    self.make_runnable(process, slot, &mut thread);
                }
            }
        }
        let parents = self.wait_lock.lock();
        self.retire_process_locked(cpu, parents, status, message)
    }

    pub(crate) fn retire_process_locked(
        &self,
        cpu: &Cpu,
        mut parents: MutexGuard<'_, Box<[Option<usize>]>>,
        status: i32,
        message: &str,
    ) -> MutexGuard<'_, KernelThread> {
        let current = cpu.running();
        if self.init_slot() == Some(current.process) {
            fatal!("init exiting with status {status}");
        }
        let process = self.process(current.process);
        let pid = process.pid();

        let init = self.init_slot();
        let mut orphaned = false;
        for parent in parents.iter_mut().filter(|parent| **parent == Some(current.process)) {
            *parent = init;
            orphaned = true;
        }
        if let (true, Some(init)) = (orphaned, init) {
            self.wakeup(Some(current), Channel::of(self.process(init)));
        }
        if let Some(parent) = parents[current.process] {
            self.wakeup(Some(current), Channel::of(self.process(parent)));
        }

        let mut inner = process.inner.lock();
        inner.exit_status = status;
        inner.exit_message = truncate_exit_message(message);
        inner.status = ProcessStatus::Zombie;
        process.stats(current.thread).stop();
        let mut thread = process.thread(current.thread).lock();
        thread.exit_code = status;
        thread.status = ThreadStatus::Zombie;
        debug!("pid {pid} exited with status {status}");
        thread
    }

    pub fn exit(&self, cpu: &Cpu, status: i32, message: &str) -> ! {
        let thread = self.retire_process(cpu, status, message);
        self.relinquish(cpu, thread)
    }

    fn reap_child(&self, parent: usize, parents: &mut [Option<usize>]) -> Result<Option<ExitReport>, ThreadError> {
        let mut have_children = false;
        for slot in 0..parents.len() {
            if parents[slot] != Some(parent) {
                continue;
            }
            have_children = true;
            let child = self.process(slot);
            let inner = child.inner.lock();
            if inner.status != ProcessStatus::Zombie || child.any_running() {
                continue;
            }
            let report = ExitReport {
                pid: inner.pid,
                status: inner.exit_status,
                message: inner.exit_message.clone(),
            };
            drop(inner);
            parents[slot] = None;
            self.free_process(slot);
            debug!("reaped pid {}", report.pid);
            return Ok(Some(report));
        }
        if have_children {
            Ok(None)
        } else {
            Err(ThreadError::NoChildren)
        }
    }

    /// Collects an exited child if there is one. `None` means every child is
    /// still alive.
    pub fn try_wait(&self, cpu: &Cpu) -> Result<Option<ExitReport>, ThreadError> {
        let current = cpu.running();
        let mut parents = self.wait_lock.lock();
        self.reap_child(current.process, &mut parents)
    }

    /// Waits for a child to exit and collects it.
    pub fn wait(&self, cpu: &Cpu) -> Result<ExitReport, ThreadError> {
        let (process, _) = self.current(cpu);
        let mut parents = self.wait_lock.lock();
        loop {
            if let Some(report) = self.reap_child(process.slot, &mut parents)? {
                return Ok(report);
            }
            if self.killed(cpu) {
                return Err(ThreadError::Killed);
            }
            parents = self.sleep(cpu, Channel::of(process), parents);
        }
    }

    pub(crate) fn find_process(&self, pid: Pid) -> Option<(&Process, MutexGuard<'_, ProcessInner>)> {
        self.processes.iter().find_map(|process| {
            let inner = process.inner.lock();
            (pid != 0 && inner.status != ProcessStatus::Unused && inner.pid == pid)
                .then_some((process, inner))
        })
    }

    /// Marks process `pid` killed. Its threads notice the next time they
    /// check, which sleeping threads are woken up to do.
    pub fn kill(&self, pid: Pid) -> Result<(), ThreadError> {
        let (process, mut inner) = self.find_process(pid).ok_or(ThreadError::NoSuchProcess)?;
        inner.killed = true;
        for slot in 0..process.thread_count() {
            let mut thread = process.thread(slot).lock();
            if thread.status == ThreadStatus::Sleeping {
                self.make_runnable(process, slot, &mut thread);
            }
        }
        debug!("killed pid {pid}");
        Ok(())
    }

    /// Grows or shrinks the caller's memory by `delta` bytes and returns the
    /// old size.
    pub fn grow(&self, cpu: &Cpu, delta: isize) -> Result<usize, ThreadError> {
        let (process, _) = self.current(cpu);
        let pid = process.pid();
        let pager = self.pager();
        let mut memory = process.memory.lock();
        let old_size = memory.size;
        let new_size = old_size
            .checked_add_signed(delta)
            .filter(|&size| size <= trap_frame_address(self.config.threads_per_process - 1))
            .ok_or(ThreadError::InvalidArgument)?;
        if new_size > old_size {
            memory.grow(&pager, pid, new_size)?;
        } else {
            memory.shrink(&pager, new_size);
        }
        Ok(old_size)
    }

    /// Bytes of user memory process `pid` has.
    pub fn memsize(&self, pid: Pid) -> Result<usize, ThreadError> {
        let (process, _inner) = self.find_process(pid).ok_or(ThreadError::NoSuchProcess)?;
        let size = process.memory.lock().size;
        Ok(size)
    }

    /// Handles a page fault by the running thread. A fault that is not on a
    /// paged-out page is a bad access and kills the process.
    pub fn page_fault(&self, cpu: &Cpu, vaddr: usize) -> Result<(), ThreadError> {
        let (process, _) = self.current(cpu);
        let pid = process.pid();
        let result = self.pager().on_fault(pid, &mut process.memory.lock(), vaddr);
        if let Err(error) = result {
            warn!("pid {pid} faulted at {vaddr:#x}: {error}");
            process.inner.lock().killed = true;
            return Err(error.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::tests::{running_on, test_system};
    use alloc::vec;

    const IMAGE: &[u8] = b"\x13\x05\x10\x00init";

    fn read_byte(system: &SystemState, slot: usize, vaddr: usize) -> u8 {
        let process = system.process(slot);
        let pid = process.pid();
        let mut byte = [0u8];
        process
            .memory
            .lock()
            .read_bytes(&system.pager(), pid, vaddr, &mut byte)
            .expect("readable");
        byte[0]
    }

    fn write_byte(system: &SystemState, slot: usize, vaddr: usize, value: u8) {
        let process = system.process(slot);
        let pid = process.pid();
        process
            .memory
            .lock()
            .write_bytes(&system.pager(), pid, vaddr, &[value])
            .expect("writable");
    }

    fn start_init(system: &SystemState) -> Cpu {
        system.user_init(IMAGE).expect("init starts");
        let slot = system.init_slot().expect("init slot");
        running_on(slot, 0)
    }

    #[test]
    fn user_init_loads_image() {
        let system = test_system(|_| {});
        assert_eq!(system.user_init(IMAGE), Ok(1));
        let slot = system.init_slot().expect("init slot");
        let process = system.process(slot);
        assert_eq!(process.memory.lock().size, 2 * PAGE_FRAME_SIZE);
        assert!(!process.memory.lock().paged);
        assert_eq!(read_byte(&system, slot, 4), b'i');

        let frame = *process.trap_frame(0).lock();
        assert_eq!(frame.epc, 0);
        assert_eq!(frame.sp(), 2 * PAGE_FRAME_SIZE);
        assert_eq!(process.thread(0).lock().status, ThreadStatus::Runnable);
    }

    #[test]
    fn fork_copies_memory_and_trap_frame() {
        let system = test_system(|_| {});
        let cpu = start_init(&system);
        let init = cpu.running().process;
        system.process(init).trap_frame(0).lock().set_a0(77);

        let child_pid = system.fork(&cpu).expect("forked");
        assert_eq!(child_pid, 2);
        let child = (0..system.processes.len())
            .find(|&slot| system.process(slot).pid() == child_pid)
            .expect("child slot");
        assert_eq!(system.wait_lock.lock()[child], Some(init));
        assert_eq!(system.process(child).trap_frame(0).lock().a0(), 0);
        assert_eq!(system.process(child).thread(0).lock().status, ThreadStatus::Runnable);
        // pid 2 is not exempt.
        assert!(system.process(child).memory.lock().paged);

        write_byte(&system, init, 4, b'X');
        assert_eq!(read_byte(&system, child, 4), b'i');
        assert_eq!(read_byte(&system, init, 4), b'X');
    }

    #[test]
    fn fork_of_paged_process_copies_swap() {
        let system = test_system(|config| {
            config.exempt = vec![];
            config.quota = 2;
        });
        let cpu = start_init(&system);
        let init = cpu.running().process;
        assert_eq!(system.grow(&cpu, 2 * PAGE_FRAME_SIZE as isize), Ok(2 * PAGE_FRAME_SIZE));
        for page in 0..4u8 {
            write_byte(&system, init, usize::from(page) * PAGE_FRAME_SIZE + 1, page + 10);
        }
        {
            let memory = system.process(init).memory.lock();
            let state = memory.paging.as_ref().expect("paging state");
            assert_eq!(state.resident_count(), 2);
            assert_eq!(state.swapped_count(), 2);
        }

        system.fork(&cpu).expect("forked");
        let child = 1;
        {
            let memory = system.process(child).memory.lock();
            assert!(memory.paged);
            assert!(memory.swap_file.is_some());
            assert_eq!(memory.paging.as_ref().map(|state| state.swapped_count()), Some(2));
        }
        for page in 0..4u8 {
            assert_eq!(
                read_byte(&system, child, usize::from(page) * PAGE_FRAME_SIZE + 1),
                page + 10
            );
        }
    }

    #[test]
    fn paged_process_cannot_outgrow_twice_its_quota() {
        let system = test_system(|config| {
            config.exempt = vec![];
            config.quota = 2;
        });
        let cpu = start_init(&system);
        let page = PAGE_FRAME_SIZE as isize;
        assert_eq!(system.grow(&cpu, 2 * page), Ok(2 * PAGE_FRAME_SIZE));
        assert_eq!(
            system.grow(&cpu, page),
            Err(ThreadError::Memory(SwapError::SwapSetFull))
        );
        assert_eq!(system.memsize(1), Ok(4 * PAGE_FRAME_SIZE));
        assert_eq!(system.grow(&cpu, -3 * page), Ok(4 * PAGE_FRAME_SIZE));
        assert_eq!(system.memsize(1), Ok(PAGE_FRAME_SIZE));
        assert_eq!(system.grow(&cpu, -2 * page), Err(ThreadError::InvalidArgument));
        assert_eq!(system.grow(&cpu, isize::MAX), Err(ThreadError::InvalidArgument));
        assert_eq!(system.memsize(9), Err(ThreadError::NoSuchProcess));
    }

    #[test]
    fn exit_then_wait_reports_status() {
        let system = test_system(|_| {});
        let cpu = start_init(&system);
        assert_eq!(system.try_wait(&cpu), Err(ThreadError::NoChildren));

        let child_pid = system.fork(&cpu).expect("forked");
        let child = 1;
        assert_eq!(system.try_wait(&cpu), Ok(None));

        let child_cpu = running_on(child, 0);
        system.process(child).thread(0).lock().status = ThreadStatus::Running;
        drop(system.retire_process(&child_cpu, 3, "done"));
        assert_eq!(system.process(child).inner.lock().status, ProcessStatus::Zombie);
        assert!(system.process(child).memory.lock().swap_file.is_some());

        let report = system.wait(&cpu).expect("child collected");
        assert_eq!(
            report,
            ExitReport {
                pid: child_pid,
                status: 3,
                message: String::from("done"),
            }
        );
        assert_eq!(system.process(child).inner.lock().status, ProcessStatus::Unused);
        assert_eq!(system.process(child).memory.lock().size, 0);
        assert_eq!(system.process(child).memory.lock().swap_file, None);
        assert_eq!(system.try_wait(&cpu), Err(ThreadError::NoChildren));
    }

    #[test]
    fn orphans_go_to_init() {
        let system = test_system(|_| {});
        let cpu = start_init(&system);
        let init = cpu.running().process;
        system.fork(&cpu).expect("forked");
        let middle = running_on(1, 0);
        system.fork(&middle).expect("forked again");
        assert_eq!(system.wait_lock.lock()[2], Some(1));

        drop(system.retire_process(&middle, 0, ""));
        assert_eq!(system.wait_lock.lock()[2], Some(init));
        assert_eq!(system.try_wait(&cpu).map(|report| report.map(|r| r.pid)), Ok(Some(2)));
    }

    #[test]
    fn exit_kills_other_threads() {
        let system = test_system(|_| {});
        let cpu = start_init(&system);
        system.fork(&cpu).expect("forked");
        let child_cpu = running_on(1, 0);
        system.kthread_create(&child_cpu, 0, 0, 0x100).expect("thread");
        {
            let mut thread = system.process(1).thread(1).lock();
            thread.status = ThreadStatus::Sleeping;
            thread.channel = Some(Channel::of(&system.clock));
        }
        drop(system.retire_process(&child_cpu, 1, ""));
        let sibling = system.process(1).thread(1).lock();
        assert!(sibling.killed);
        assert_eq!(sibling.status, ThreadStatus::Runnable);
    }

    #[test]
    fn sibling_can_fault_after_exit() {
        let system = test_system(|config| config.quota = 2);
        let cpu = start_init(&system);
        system.fork(&cpu).expect("forked");
        let child = 1;
        let main = running_on(child, 0);
        let page = PAGE_FRAME_SIZE as isize;
        assert_eq!(system.grow(&main, 2 * page), Ok(2 * PAGE_FRAME_SIZE));
        assert!(system
            .process(child)
            .memory
            .lock()
            .page_table
            .translate(0)
            .expect("mapped")
            .paged_out());
        system.kthread_create(&main, 0, 0, 0x100).expect("thread");
        drop(system.retire_process(&main, 0, ""));

        let sibling = running_on(child, 1);
        assert!(system.killed(&sibling));
        assert_eq!(system.page_fault(&sibling, 0), Ok(()));
        assert_eq!(read_byte(&system, child, 4), b'i');
        {
            let memory = system.process(child).memory.lock();
            let state = memory.paging.as_ref().expect("paging state kept");
            assert!(state.resident_slot(0).is_some());
            assert_eq!(state.resident_count() + state.swapped_count(), 4);
        }

        assert_eq!(system.wait(&cpu).map(|report| report.pid), Ok(2));
        assert_eq!(system.process(child).memory.lock().swap_file, None);
    }

    #[test]
    fn kill_marks_process_and_wakes_sleepers() {
        let system = test_system(|_| {});
        let cpu = start_init(&system);
        system.fork(&cpu).expect("forked");
        {
            let mut thread = system.process(1).thread(0).lock();
            thread.status = ThreadStatus::Sleeping;
            thread.channel = Some(Channel::of(&system.clock));
        }
        assert_eq!(system.kill(2), Ok(()));
        assert_eq!(system.process(1).thread(0).lock().status, ThreadStatus::Runnable);
        assert!(system.killed(&running_on(1, 0)));
        assert_eq!(system.kill(7), Err(ThreadError::NoSuchProcess));
    }

    #[test]
    fn bad_fault_kills_process() {
        let system = test_system(|_| {});
        let cpu = start_init(&system);
        assert_eq!(
            system.page_fault(&cpu, 0x10_0000),
            Err(ThreadError::Memory(SwapError::Unmapped))
        );
        assert!(system.killed(&cpu));
    }

    #[test]
    #[should_panic(expected = "init exiting")]
    fn init_may_not_exit() {
        let system = test_system(|_| {});
        let cpu = start_init(&system);
        let _ = system.retire_process(&cpu, 0, "");
    }

    #[test]
    fn full_process_table() {
        let system = test_system(|config| config.max_processes = 2);
        let cpu = start_init(&system);
        system.fork(&cpu).expect("forked");
        assert_eq!(system.fork(&cpu), Err(ThreadError::NoFreeSlot));
    }
}
