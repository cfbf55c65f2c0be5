use super::PagingState;
use crate::mem::PageTable;
use core::fmt;

const ACCESSED_BIT: u32 = 1 << 31;

/// Chooses which resident page of a process to push out to its swap file.
pub trait PageReplacementPolicy {
    /// Picks a victim among the in-use resident slots, returning its slot.
    /// Returns `None` only when nothing is resident.
    fn select_victim(&self, state: &mut PagingState, page_table: &mut dyn PageTable)
        -> Option<usize>;

    /// Age given to a page when it becomes resident.
    fn initial_age(&self) -> u32 {
        0
    }

    /// Whether the scheduler should age this policy's pages after every quantum.
    fn ages_pages(&self) -> bool {
        false
    }
}

/// Not Frequently Used with Aging: evict the page with the smallest age.
pub struct NotFrequentlyUsed;

/// Least Accessed Page with Aging: evict the page whose age has the fewest set
/// bits, breaking ties by the smaller age.
pub struct LeastAccessedPage;

/// Second-chance FIFO: walk the resident slots in a circle from where the last
/// scan stopped, sparing (and clearing) pages whose access bit is set.
pub struct SecondChanceFifo;

fn in_use_slots(state: &PagingState) -> impl Iterator<Item = (usize, u32)> + '_ {
    state
        .resident()
        .iter()
        .enumerate()
        .filter(|(_, page)| page.in_use)
        .map(|(slot, page)| (slot, page.age))
}

impl PageReplacementPolicy for NotFrequentlyUsed {
    fn select_victim(&self, state: &mut PagingState, _: &mut dyn PageTable) -> Option<usize> {
        // `min_by_key` keeps the first of equal elements, so ties go to the
        // lowest slot.
        in_use_slots(state)
            .min_by_key(|&(_, age)| age)
            .map(|(slot, _)| slot)
    }

    fn ages_pages(&self) -> bool {
        true
    }
}

impl PageReplacementPolicy for LeastAccessedPage {
    fn select_victim(&self, state: &mut PagingState, _: &mut dyn PageTable) -> Option<usize> {
        in_use_slots(state)
            .min_by_key(|&(_, age)| (age.count_ones(), age))
            .map(|(slot, _)| slot)
    }

    fn initial_age(&self) -> u32 {
        u32::MAX
    }

    fn ages_pages(&self) -> bool {
        true
    }
}

impl PageReplacementPolicy for SecondChanceFifo {
    fn select_victim(
        &self,
        state: &mut PagingState,
        page_table: &mut dyn PageTable,
    ) -> Option<usize> {
        let capacity = state.capacity();
        if state.resident_count() == 0 {
            return None;
        }

        // After one full lap every access bit has been cleared, so the second
        // lap always finds a victim.
        let mut slot = state.cursor % capacity;
        for _ in 0..2 * capacity {
            let page = state.resident()[slot];
            if page.in_use {
                let entry = page_table
                    .translate(page.vaddr)
                    .unwrap_or_else(|_| fatal!("resident page {:#x} is unmapped", page.vaddr));
                if !entry.accessed() {
                    state.cursor = (slot + 1) % capacity;
                    return Some(slot);
                }
                *entry = entry.with_accessed(false);
            }
            slot = (slot + 1) % capacity;
        }
        unreachable!("second-chance scan found no victim")
    }
}

/// Shifts every resident page's age right by one, folding in (and clearing)
/// the hardware access bit as the new top bit.
pub fn age_resident_pages(state: &mut PagingState, page_table: &mut dyn PageTable) {
    for page in state.resident_mut().iter_mut().filter(|page| page.in_use) {
        let entry = page_table
            .translate(page.vaddr)
            .unwrap_or_else(|_| fatal!("resident page {:#x} is unmapped", page.vaddr));
        page.age >>= 1;
        if entry.accessed() {
            page.age |= ACCESSED_BIT;
            *entry = entry.with_accessed(false);
        }
    }
}

/// The replacement policy chosen at boot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplacementPolicy {
    Nfua,
    Lapa,
    Scfifo,
    /// Paging is off: every process is exempt.
    None,
}

impl ReplacementPolicy {
    fn strategy(self) -> Option<&'static dyn PageReplacementPolicy> {
        match self {
            ReplacementPolicy::Nfua => Some(&NotFrequentlyUsed),
            ReplacementPolicy::Lapa => Some(&LeastAccessedPage),
            ReplacementPolicy::Scfifo => Some(&SecondChanceFifo),
            ReplacementPolicy::None => None,
        }
    }

    pub fn is_enabled(self) -> bool {
        self.strategy().is_some()
    }

    pub fn select_victim(
        self,
        state: &mut PagingState,
        page_table: &mut dyn PageTable,
    ) -> Option<usize> {
        self.strategy()?.select_victim(state, page_table)
    }

    pub fn initial_age(self) -> u32 {
        self.strategy().map_or(0, |strategy| strategy.initial_age())
    }

    pub fn ages_pages(self) -> bool {
        self.strategy().is_some_and(|strategy| strategy.ages_pages())
    }
}

impl fmt::Display for ReplacementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReplacementPolicy::Nfua => "nfua",
            ReplacementPolicy::Lapa => "lapa",
            ReplacementPolicy::Scfifo => "scfifo",
            ReplacementPolicy::None => "none",
        })
    }
}
