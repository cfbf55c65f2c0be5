//! Processes, their kernel threads, and the scheduler that runs them.
//!
//! Everything here hangs off [`SystemState`](crate::system::SystemState):
//! the operations are methods on it, spread across the modules by concern.
//! Locks are always taken in this order:
//!
//! clock, wait lock, pid counter, process, kernel thread, memory.
//!
//! Locks further right may be taken while holding ones further left, never
//! the reverse. Two kernel thread locks are only ever nested by
//! [`wakeup`](crate::system::SystemState::wakeup), which skips the caller.

pub mod context_switch;
pub mod process;
pub mod process_table;
pub mod scheduling;
pub mod thread_control_block;
pub mod thread_error;
pub mod thread_sleep;
pub mod thread_table;

pub use thread_error::ThreadError;

use context_switch::Context;

/// Names a kernel thread by where it lives: its process's slot in the
/// process table and its own slot in that process's thread table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreadRef {
    pub process: usize,
    pub thread: usize,
}

/// What a sleeping thread waits on. Any address works as a channel; by
/// convention it is the address of the object guarding the condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Channel(usize);

impl Channel {
    pub fn of<T: ?Sized>(object: &T) -> Self {
        Self(core::ptr::from_ref(object).cast::<()>() as usize)
    }
}

/// Per-hart state.
#[derive(Debug)]
pub struct Cpu {
    pub id: usize,
    /// Where the scheduler loop is parked while a kernel thread runs.
    pub context: Context,
    pub current: Option<ThreadRef>,
}

impl Cpu {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            context: Context::default(),
            current: None,
        }
    }

    /// The kernel thread this hart is running. Only meaningful from code
    /// running on behalf of a thread.
    pub fn running(&self) -> ThreadRef {
        self.current
            .expect("no kernel thread is running on this hart")
    }
}
