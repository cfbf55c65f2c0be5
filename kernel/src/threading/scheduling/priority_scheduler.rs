use super::scheduler::{Candidate, Scheduler};
use crate::threading::ThreadRef;

/// Runs the thread that has accumulated the least priority-weighted time.
pub struct PriorityScheduler;

impl Scheduler for PriorityScheduler {
    fn pick(&self, candidates: &[Candidate]) -> Option<ThreadRef> {
        candidates
            .iter()
            .min_by_key(|candidate| candidate.accumulator)
            .map(|candidate| candidate.thread)
    }
}
