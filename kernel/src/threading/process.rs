use super::{
    context_switch::TrapFrame,
    thread_control_block::{KernelThread, SchedStats, Tid},
};
use crate::{
    mem::{AddressSpace, PageTable},
    sync::mutex::Mutex,
};
use alloc::{boxed::Box, string::String};
use kestrel_shared::{
    mem::{kernel_stack_address, PAGE_FRAME_SIZE},
    sizes::EXIT_MESSAGE_SIZE,
};

pub type Pid = u16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessStatus {
    Unused,
    Used,
    /// Exited, waiting for its parent to collect the exit status.
    Zombie,
}

/// The part of a process guarded by the process lock.
#[derive(Debug)]
pub struct ProcessInner {
    pub pid: Pid,
    pub status: ProcessStatus,
    pub killed: bool,
    pub exit_status: i32,
    pub exit_message: String,
}

impl ProcessInner {
    pub(crate) fn new() -> Self {
        Self {
            pid: 0,
            status: ProcessStatus::Unused,
            killed: false,
            exit_status: 0,
            exit_message: String::new(),
        }
    }
}

/// A slot in the process table. Slots are created once at boot and reused;
/// everything that refers to a process does so by slot index.
pub struct Process {
    pub slot: usize,
    pub inner: Mutex<ProcessInner>,
    pub(crate) next_tid: Mutex<Tid>,
    threads: Box<[Mutex<KernelThread>]>,
    stats: Box<[SchedStats]>,
    trap_frames: Box<[Mutex<TrapFrame>]>,
    pub memory: Mutex<AddressSpace>,
}

impl Process {
    pub fn new(slot: usize, threads_per_process: usize, page_table: Box<dyn PageTable>) -> Self {
        let threads = (0..threads_per_process)
            .map(|thread| {
                let stack = kernel_stack_address(slot * threads_per_process + thread);
                Mutex::new(KernelThread::new(stack + PAGE_FRAME_SIZE))
            })
            .collect();
        Self {
            slot,
            inner: Mutex::new(ProcessInner::new()),
            next_tid: Mutex::new(1),
            threads,
            stats: (0..threads_per_process).map(|_| SchedStats::default()).collect(),
            trap_frames: (0..threads_per_process)
                .map(|_| Mutex::new(TrapFrame::default()))
                .collect(),
            memory: Mutex::new(AddressSpace::new(page_table, false)),
        }
    }

    pub fn pid(&self) -> Pid {
        self.inner.lock().pid
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn thread(&self, slot: usize) -> &Mutex<KernelThread> {
        &self.threads[slot]
    }

    pub fn stats(&self, slot: usize) -> &SchedStats {
        &self.stats[slot]
    }

    /// The trap frame a thread in `slot` uses. The pairing never changes.
    pub fn trap_frame(&self, slot: usize) -> &Mutex<TrapFrame> {
        &self.trap_frames[slot]
    }

    /// Issues the next kid. Kids are never handed out twice in the life of a
    /// process, so once the counter runs out no more threads can be created.
    pub(crate) fn allocate_tid(&self) -> Option<Tid> {
        let mut next_tid = self.next_tid.lock();
        let tid = *next_tid;
        *next_tid = tid.checked_add(1)?;
        Some(tid)
    }

    pub(crate) fn reset_tids(&self) {
        *self.next_tid.lock() = 1;
    }

    /// Whether any thread of the process has been created and has not yet
    /// exited.
    pub fn has_live_threads(&self) -> bool {
        self.stats.iter().any(SchedStats::is_live)
    }
}

/// Cuts an exit message down to what a parent can collect, keeping room for
/// the terminating NUL user space expects.
pub fn truncate_exit_message(message: &str) -> String {
    let mut end = message.len().min(EXIT_MESSAGE_SIZE - 1);
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    String::from(&message[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::SoftPageTable;

    #[test]
    fn threads_get_distinct_kernel_stacks() {
        let process = Process::new(1, 4, Box::new(SoftPageTable::new()));
        let stacks: alloc::vec::Vec<usize> = (0..4)
            .map(|slot| process.thread(slot).lock().kernel_stack)
            .collect();
        assert_eq!(stacks[0], kernel_stack_address(4) + PAGE_FRAME_SIZE);
        assert_eq!(stacks[3], kernel_stack_address(7) + PAGE_FRAME_SIZE);
        assert!(stacks.windows(2).all(|pair| pair[0] > pair[1]));
    }

    #[test]
    fn tids_count_up_from_one() {
        let process = Process::new(0, 2, Box::new(SoftPageTable::new()));
        assert_eq!(process.allocate_tid(), Some(1));
        assert_eq!(process.allocate_tid(), Some(2));
        process.reset_tids();
        assert_eq!(process.allocate_tid(), Some(1));
    }

    #[test]
    fn tids_run_out_instead_of_wrapping() {
        let process = Process::new(0, 2, Box::new(SoftPageTable::new()));
        *process.next_tid.lock() = Tid::MAX - 1;
        assert_eq!(process.allocate_tid(), Some(Tid::MAX - 1));
        assert_eq!(process.allocate_tid(), None);
        assert_eq!(process.allocate_tid(), None);
    }

    #[test]
    fn exit_messages_are_truncated() {
        assert_eq!(truncate_exit_message("bye"), "bye");
        let long = "x".repeat(40);
        assert_eq!(truncate_exit_message(&long).len(), EXIT_MESSAGE_SIZE - 1);
        // A multibyte character straddling the limit is dropped whole.
        let accented = alloc::format!("{}é", "y".repeat(30));
        assert_eq!(truncate_exit_message(&accented), "y".repeat(30));
    }
}
