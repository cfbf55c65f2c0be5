use crate::{
    sync::mutex::Mutex,
    system::SystemState,
    threading::{thread_control_block::ThreadStatus, Channel, Cpu, ThreadError, ThreadRef},
};
use core::{sync::atomic::Ordering, time::Duration};

// The CLINT is programmed for 1,000,000 cycles between timer interrupts, a
// tenth of a second on QEMU's 10 MHz timebase.
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Counts timer ticks since boot. Sleepers wait on the clock itself.
#[derive(Debug)]
pub struct Clock {
    ticks: Mutex<u64>,
}

impl Clock {
    pub const fn new() -> Self {
        Self {
            ticks: Mutex::new(0),
        }
    }

    pub fn uptime(&self) -> u64 {
        *self.ticks.lock()
    }

    pub fn uptime_duration(&self) -> Duration {
        TICK_INTERVAL
            .checked_mul(u32::try_from(self.uptime()).unwrap_or(u32::MAX))
            .unwrap_or(Duration::MAX)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemState {
    /// Timer interrupt work, done on one hart only: advances the clock,
    /// wakes sleepers and charges the tick to every live thread's statistics.
    /// `current` is the thread the interrupt arrived on, if any.
    pub fn clock_tick(&self, current: Option<ThreadRef>) {
        let mut ticks = self.clock.ticks.lock();
        *ticks = match ticks.checked_add(1) {
            Some(update) => update,
            None => panic!("System clock overflowed!"),
        };
        self.wakeup(current, Channel::of(&self.clock));
        drop(ticks);
        self.account_tick(current);
    }

    fn account_tick(&self, current: Option<ThreadRef>) {
        for process in self.processes.iter() {
            for slot in 0..process.thread_count() {
                let stats = process.stats(slot);
                if !stats.is_live() {
                    continue;
                }
                let this = ThreadRef {
                    process: process.slot,
                    thread: slot,
                };
                // A thread whose lock is held is on its way on or off a hart.
                let status = match process.thread(slot).try_lock() {
                    Some(thread) if current != Some(this) => thread.status,
                    _ => ThreadStatus::Running,
                };
                let counter = match status {
                    ThreadStatus::Running => &stats.run_ticks,
                    ThreadStatus::Sleeping => &stats.sleep_ticks,
                    ThreadStatus::Runnable => &stats.ready_ticks,
                    _ => continue,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Sleeps the running thread for `ticks` clock ticks. Gives up early if
    /// the thread is killed.
    pub fn sleep_ticks(&self, cpu: &Cpu, ticks: u64) -> Result<(), ThreadError> {
        let mut now = self.clock.ticks.lock();
        let start = *now;
        while *now - start < ticks {
            if self.killed(cpu) {
                return Err(ThreadError::Killed);
            }
            now = self.sleep(cpu, Channel::of(&self.clock), now);
        }
        Ok(())
    }

    pub fn uptime(&self) -> u64 {
        self.clock.uptime()
    }
}
