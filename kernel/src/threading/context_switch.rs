use super::{
    process::Process,
    thread_control_block::{KernelThread, ThreadStatus},
    Cpu,
};
use crate::sync::mutex::{Mutex, MutexGuard};
use zerocopy::{FromBytes, FromZeroes};

/// Callee-saved registers, saved and restored by [`ContextSwitch::switch`].
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromZeroes, FromBytes)]
pub struct Context {
    pub ra: usize,
    pub sp: usize,
    pub s: [usize; 12],
}

/// User registers saved on entry to the kernel, plus what the trampoline needs
/// to get back into the kernel. Each kernel thread has its own.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromZeroes, FromBytes)]
pub struct TrapFrame {
    pub kernel_satp: usize,
    pub kernel_sp: usize,
    pub kernel_trap: usize,
    pub epc: usize,
    pub kernel_hartid: usize,
    /// x1 through x31.
    pub regs: [usize; 31],
}

impl TrapFrame {
    const SP: usize = 2;
    const A0: usize = 10;

    fn reg(&self, number: usize) -> usize {
        self.regs[number - 1]
    }

    fn set_reg(&mut self, number: usize, value: usize) {
        self.regs[number - 1] = value;
    }

    pub fn sp(&self) -> usize {
        self.reg(Self::SP)
    }

    pub fn set_sp(&mut self, value: usize) {
        self.set_reg(Self::SP, value);
    }

    /// First argument and return value register.
    pub fn a0(&self) -> usize {
        self.reg(Self::A0)
    }

    pub fn set_a0(&mut self, value: usize) {
        self.set_reg(Self::A0, value);
    }
}

impl Default for TrapFrame {
    fn default() -> Self {
        Self::new_zeroed()
    }
}

/// Saves the running context into `from` and resumes `to`. Returns when some
/// other context switches back into `from`.
pub trait ContextSwitch {
    fn switch(&self, from: &mut Context, to: &Context);
}

/// A switch that returns immediately, for running kernel code on a host.
pub struct NoSwitch;

impl ContextSwitch for NoSwitch {
    fn switch(&self, _: &mut Context, _: &Context) {}
}

#[cfg(all(target_os = "none", target_arch = "riscv64"))]
core::arch::global_asm!(
    ".globl switch_context",
    "switch_context:",
    "sd ra, 0(a0)",
    "sd sp, 8(a0)",
    "sd s0, 16(a0)",
    "sd s1, 24(a0)",
    "sd s2, 32(a0)",
    "sd s3, 40(a0)",
    "sd s4, 48(a0)",
    "sd s5, 56(a0)",
    "sd s6, 64(a0)",
    "sd s7, 72(a0)",
    "sd s8, 80(a0)",
    "sd s9, 88(a0)",
    "sd s10, 96(a0)",
    "sd s11, 104(a0)",
    "ld ra, 0(a1)",
    "ld sp, 8(a1)",
    "ld s0, 16(a1)",
    "ld s1, 24(a1)",
    "ld s2, 32(a1)",
    "ld s3, 40(a1)",
    "ld s4, 48(a1)",
    "ld s5, 56(a1)",
    "ld s6, 64(a1)",
    "ld s7, 72(a1)",
    "ld s8, 80(a1)",
    "ld s9, 88(a1)",
    "ld s10, 96(a1)",
    "ld s11, 104(a1)",
    "ret",
);

#[cfg(all(target_os = "none", target_arch = "riscv64"))]
extern "C" {
    fn switch_context(from: *mut Context, to: *const Context);
}

#[cfg(all(target_os = "none", target_arch = "riscv64"))]
pub struct HardwareSwitch;

#[cfg(all(target_os = "none", target_arch = "riscv64"))]
impl ContextSwitch for HardwareSwitch {
    fn switch(&self, from: &mut Context, to: &Context) {
        // SAFETY: Both contexts are valid; `to` was saved by a previous switch
        // or set up by thread creation.
        unsafe { switch_context(from, to) }
    }
}

/// Runs a thread the scheduler has picked, until it gives the hart back.
///
/// The scheduler calls this holding the thread's lock, with the thread marked
/// running, and must get the lock back held when the thread stops. While the
/// thread runs the lock is the thread's own: it releases it on resuming and
/// takes it again before switching away.
pub trait Dispatch {
    fn run<'a>(
        &mut self,
        cpu: &mut Cpu,
        process: &'a Process,
        thread: MutexGuard<'a, KernelThread>,
    ) -> MutexGuard<'a, KernelThread>;
}

/// Dispatches by switching to the thread's saved context.
pub struct SwitchDispatch<S>(pub S);

impl<S: ContextSwitch> Dispatch for SwitchDispatch<S> {
    fn run<'a>(
        &mut self,
        cpu: &mut Cpu,
        _process: &'a Process,
        thread: MutexGuard<'a, KernelThread>,
    ) -> MutexGuard<'a, KernelThread> {
        let lock: &'a Mutex<KernelThread> = MutexGuard::mutex(&thread);
        let to: *const Context = &thread.context;
        MutexGuard::forget(thread);

        // SAFETY: The thread's context stays put while its slot is in use, and
        // only the thread itself writes it, which it does when switching back.
        self.0.switch(&mut cpu.context, unsafe { &*to });

        // SAFETY: A thread switches back into the scheduler holding its own
        // lock, and releasing it is left to the scheduler.
        unsafe { lock.adopt() }
    }
}

/// Dispatches to a closure standing in for whatever the thread does between
/// being resumed and giving the hart back. The closure is called with the
/// thread's lock released, the way a resumed thread runs. A thread still
/// running when the closure returns is treated as preempted.
pub struct SimulatedDispatch<F>(pub F);

impl<F> Dispatch for SimulatedDispatch<F>
where
    F: FnMut(&mut Cpu, &Process, usize),
{
    fn run<'a>(
        &mut self,
        cpu: &mut Cpu,
        process: &'a Process,
        thread: MutexGuard<'a, KernelThread>,
    ) -> MutexGuard<'a, KernelThread> {
        let slot = cpu.running().thread;
        let lock = MutexGuard::unlocked(thread);
        (self.0)(cpu, process, slot);
        let mut thread = lock.lock();
        if thread.status == ThreadStatus::Running {
            thread.status = ThreadStatus::Runnable;
        }
        thread
    }
}
