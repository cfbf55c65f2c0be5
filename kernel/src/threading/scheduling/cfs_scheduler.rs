use super::scheduler::{Candidate, Scheduler};
use crate::threading::ThreadRef;

/// Runs the thread with the least virtual run time.
pub struct CfsScheduler;

impl Scheduler for CfsScheduler {
    fn pick(&self, candidates: &[Candidate]) -> Option<ThreadRef> {
        candidates
            .iter()
            .min_by_key(|candidate| candidate.vruntime)
            .map(|candidate| candidate.thread)
    }
}
