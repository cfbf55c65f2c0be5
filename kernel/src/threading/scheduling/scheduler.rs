use crate::threading::ThreadRef;

/// A runnable thread as the scheduler saw it when choosing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub thread: ThreadRef,
    pub accumulator: u64,
    pub vruntime: u64,
}

/// Picks which runnable thread runs next. Candidates come in process table
/// order, then thread table order.
pub trait Scheduler {
    fn pick(&self, candidates: &[Candidate]) -> Option<ThreadRef>;
}
