//! Per-process bookkeeping for paged processes: which user pages are in
//! memory, which are in the swap file, and where.

use super::SwapError;
use crate::mem::PAGE_FRAME_SIZE;
use alloc::{boxed::Box, vec};

/// A user page currently backed by a physical frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResidentPage {
    pub vaddr: usize,
    /// Aging counter. Bit 31 is set when the page was accessed during the most
    /// recent quantum.
    pub age: u32,
    pub in_use: bool,
}

/// A user page currently stored in the swap file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SwappedPage {
    pub vaddr: usize,
    /// Byte offset of the page within the process's swap file.
    pub offset: usize,
    pub in_use: bool,
}

/// Where a forgotten page was recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Forgotten {
    Resident(ResidentPage),
    Swapped(SwappedPage),
}

/// The two fixed-capacity tables, plus the second-chance FIFO cursor.
///
/// A page is recorded in at most one of the tables. Swap slot `i` always
/// stores its page at offset `i * PAGE_FRAME_SIZE`, so offsets are unique
/// among in-use slots.
#[derive(Clone, Debug)]
pub struct PagingState {
    resident: Box<[ResidentPage]>,
    swapped: Box<[SwappedPage]>,
    /// The resident slot the next second-chance scan starts from.
    pub(crate) cursor: usize,
}

impl PagingState {
    pub fn new(capacity: usize) -> Self {
        Self {
            resident: vec![ResidentPage::default(); capacity].into_boxed_slice(),
            swapped: vec![SwappedPage::default(); capacity].into_boxed_slice(),
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.resident.len()
    }

    pub fn resident(&self) -> &[ResidentPage] {
        &self.resident
    }

    pub(crate) fn resident_mut(&mut self) -> &mut [ResidentPage] {
        &mut self.resident
    }

    pub fn swapped(&self) -> &[SwappedPage] {
        &self.swapped
    }

    pub fn resident_count(&self) -> usize {
        self.resident.iter().filter(|page| page.in_use).count()
    }

    pub fn swapped_count(&self) -> usize {
        self.swapped.iter().filter(|page| page.in_use).count()
    }

    pub fn is_resident_full(&self) -> bool {
        self.resident.iter().all(|page| page.in_use)
    }

    pub fn resident_slot(&self, vaddr: usize) -> Option<usize> {
        self.resident
            .iter()
            .position(|page| page.in_use && page.vaddr == vaddr)
    }

    pub fn swapped_slot(&self, vaddr: usize) -> Option<usize> {
        self.swapped
            .iter()
            .position(|page| page.in_use && page.vaddr == vaddr)
    }

    /// Records `vaddr` as resident in the first free slot, returning the slot.
    pub fn record_resident(&mut self, vaddr: usize, age: u32) -> Result<usize, SwapError> {
        let slot = self
            .resident
            .iter()
            .position(|page| !page.in_use)
            .ok_or(SwapError::ResidentSetFull)?;
        self.resident[slot] = ResidentPage {
            vaddr,
            age,
            in_use: true,
        };
        Ok(slot)
    }

    /// Records `vaddr` as swapped out in the first free slot, returning the
    /// file offset the page belongs at.
    pub fn record_swapped(&mut self, vaddr: usize) -> Result<usize, SwapError> {
        let slot = self.free_swap_slot().ok_or(SwapError::SwapSetFull)?;
        let offset = slot * PAGE_FRAME_SIZE;
        self.swapped[slot] = SwappedPage {
            vaddr,
            offset,
            in_use: true,
        };
        Ok(offset)
    }

    pub fn free_swap_slot(&self) -> Option<usize> {
        self.swapped.iter().position(|page| !page.in_use)
    }

    pub fn find_swap_offset(&self, vaddr: usize) -> Result<usize, SwapError> {
        self.swapped_slot(vaddr)
            .map(|slot| self.swapped[slot].offset)
            .ok_or(SwapError::NotSwapped)
    }

    pub(crate) fn take_resident(&mut self, slot: usize) -> ResidentPage {
        core::mem::take(&mut self.resident[slot])
    }

    pub(crate) fn take_swapped(&mut self, slot: usize) -> SwappedPage {
        core::mem::take(&mut self.swapped[slot])
    }

    /// Drops whichever record `vaddr` has.
    pub fn forget(&mut self, vaddr: usize) -> Option<Forgotten> {
        if let Some(slot) = self.resident_slot(vaddr) {
            return Some(Forgotten::Resident(self.take_resident(slot)));
        }
        self.swapped_slot(vaddr)
            .map(|slot| Forgotten::Swapped(self.take_swapped(slot)))
    }
}
