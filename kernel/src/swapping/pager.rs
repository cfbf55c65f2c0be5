use super::{
    swap_file_name, BackingStore, PagingState, ReplacementPolicy, SwapError, SwapHandle,
    SwapIoError,
};
use crate::mem::{page_buffer, page_round_down, AddressSpace, FrameAllocator, PageTable, PAGE_FRAME_SIZE};
use crate::threading::process::Pid;
use log::{debug, warn};

/// Moves pages of paged processes between frames and swap files.
///
/// Every method expects the caller to hold the process's memory lock, which
/// is what `space` is borrowed from. Broken bookkeeping is fatal: a page that
/// should be resident but is not, a full swap table during eviction, or a
/// failed swap transfer all halt the kernel.
pub struct Pager<'a> {
    pub frames: &'a dyn FrameAllocator,
    pub store: &'a dyn BackingStore,
    pub policy: ReplacementPolicy,
    /// Maximum number of resident pages per paged process.
    pub quota: usize,
}

struct Tables<'s> {
    state: &'s mut PagingState,
    page_table: &'s mut dyn PageTable,
    swap_file: SwapHandle,
}

fn tables(pid: Pid, space: &mut AddressSpace) -> Tables<'_> {
    let AddressSpace {
        page_table,
        paging,
        swap_file,
        ..
    } = space;
    match (paging.as_mut(), *swap_file) {
        (Some(state), Some(swap_file)) => Tables {
            state,
            page_table: &mut **page_table,
            swap_file,
        },
        _ => fatal!("pid {pid} has no paging state"),
    }
}

impl<'a> Pager<'a> {
    /// A paged process may have at most this many pages, counting both
    /// resident and swapped ones.
    pub fn max_pages(&self) -> usize {
        2 * self.quota
    }

    /// Creates the paging tables and swap file the first time a paged process
    /// needs them.
    fn ensure_tables(&self, pid: Pid, space: &mut AddressSpace) -> Result<(), SwapError> {
        if space.paging.is_some() {
            return Ok(());
        }
        let handle = self.store.create(pid)?;
        debug!("created {} for pid {pid}", swap_file_name(pid));
        space.swap_file = Some(handle);
        space.paging = Some(PagingState::new(self.quota));
        Ok(())
    }

    /// Records a newly mapped, resident user page, evicting another page first
    /// if the process already has `quota` pages in memory.
    pub fn on_allocate(
        &self,
        pid: Pid,
        space: &mut AddressSpace,
        vaddr: usize,
    ) -> Result<(), SwapError> {
        if !space.paged {
            return Ok(());
        }
        self.ensure_tables(pid, space)?;

        let vaddr = page_round_down(vaddr);
        let mut tables = tables(pid, space);
        if tables.state.is_resident_full() {
            self.evict(pid, &mut tables);
        }
        if let Err(error) = tables.state.record_resident(vaddr, self.policy.initial_age()) {
            fatal!("no resident slot for {vaddr:#x} of pid {pid} after eviction: {error}");
        }
        Ok(())
    }

    /// Brings a paged-out page back into memory.
    ///
    /// Fails with [`SwapError::Unmapped`] or [`SwapError::NotSwapped`] if the
    /// address is not a paged-out page of this process; the caller treats that
    /// as a bad user access. Fails with [`SwapError::OutOfMemory`] if no frame
    /// can be found, leaving the page in swap.
    pub fn on_fault(
        &self,
        pid: Pid,
        space: &mut AddressSpace,
        vaddr: usize,
    ) -> Result<(), SwapError> {
        let vaddr = page_round_down(vaddr);
        if !space.page_table.translate(vaddr)?.paged_out() {
            return Err(SwapError::NotSwapped);
        }

        let mut tables = tables(pid, space);
        let Some(slot) = tables.state.swapped_slot(vaddr) else {
            fatal!("{vaddr:#x} of pid {pid} is paged out but has no swap slot");
        };
        let offset = tables.state.swapped()[slot].offset;

        // Read the page out before anything else can reuse its swap slot.
        let mut buffer = page_buffer();
        match self.store.read_at(tables.swap_file, &mut buffer, offset) {
            Ok(PAGE_FRAME_SIZE) => {}
            other => fatal!("reading {vaddr:#x} of pid {pid} from swap: {other:?}"),
        }
        tables.state.take_swapped(slot);

        if tables.state.is_resident_full() {
            self.evict(pid, &mut tables);
        }

        let frame = match self.frames.alloc_frame() {
            Ok(frame) => frame,
            Err(error) => {
                warn!("no frame to swap {vaddr:#x} of pid {pid} back in");
                self.write_back(pid, &mut tables, vaddr, &buffer);
                return Err(error.into());
            }
        };
        self.frames.write_frame(frame, &buffer);

        let entry = match tables.page_table.translate(vaddr) {
            Ok(entry) => entry,
            Err(error) => fatal!("{vaddr:#x} of pid {pid} vanished during swap-in: {error}"),
        };
        *entry = entry
            .with_frame(frame)
            .with_paged_out(false)
            .with_valid(true);
        tables.page_table.flush_tlb_entry(vaddr);

        if let Err(error) = tables.state.record_resident(vaddr, self.policy.initial_age()) {
            fatal!("no resident slot for {vaddr:#x} of pid {pid} after eviction: {error}");
        }
        debug!("swapped in {vaddr:#x} of pid {pid} from offset {offset:#x}");
        Ok(())
    }

    /// Puts a page whose contents are in `buffer` back into swap.
    fn write_back(&self, pid: Pid, tables: &mut Tables, vaddr: usize, buffer: &[u8]) {
        let offset = match tables.state.record_swapped(vaddr) {
            Ok(offset) => offset,
            Err(error) => fatal!("no swap slot to return {vaddr:#x} of pid {pid}: {error}"),
        };
        match self.store.write_at(tables.swap_file, buffer, offset) {
            Ok(PAGE_FRAME_SIZE) => {}
            other => fatal!("writing {vaddr:#x} of pid {pid} to swap: {other:?}"),
        }
    }

    /// Chooses a victim with the configured policy and swaps it out. Returns
    /// the resident slot that was freed.
    fn evict(&self, pid: Pid, tables: &mut Tables) -> usize {
        let Some(slot) = self
            .policy
            .select_victim(tables.state, tables.page_table)
        else {
            fatal!("pid {pid} has a full resident set but no victim");
        };
        self.swap_out(pid, tables, slot);
        slot
    }

    fn swap_out(&self, pid: Pid, tables: &mut Tables, slot: usize) {
        let page = tables.state.resident()[slot];
        if !page.in_use {
            fatal!("swapping out unused resident slot {slot} of pid {pid}");
        }
        let vaddr = page.vaddr;
        let Some(swap_slot) = tables.state.free_swap_slot() else {
            fatal!("swap table of pid {pid} is full");
        };
        let offset = swap_slot * PAGE_FRAME_SIZE;

        let entry = match tables.page_table.translate(vaddr) {
            Ok(entry) if entry.is_resident() => entry,
            _ => fatal!("victim {vaddr:#x} of pid {pid} is not resident"),
        };
        let frame = entry.frame();

        let mut buffer = page_buffer();
        self.frames.read_frame(frame, &mut buffer);
        match self.store.write_at(tables.swap_file, &buffer, offset) {
            Ok(PAGE_FRAME_SIZE) => {}
            other => fatal!("writing {vaddr:#x} of pid {pid} to swap: {other:?}"),
        }
        self.frames.free_frame(frame);

        *entry = entry
            .with_valid(false)
            .with_paged_out(true)
            .with_accessed(false)
            .with_frame(0);
        tables.page_table.flush_tlb_entry(vaddr);

        tables.state.take_resident(slot);
        let recorded = tables.state.record_swapped(vaddr);
        debug_assert_eq!(recorded, Ok(offset));
        debug!("evicted {vaddr:#x} of pid {pid} to offset {offset:#x}");
    }

    /// Ages the resident pages of a paged process, if the policy ages at all.
    pub fn age(&self, space: &mut AddressSpace) {
        if !self.policy.ages_pages() {
            return;
        }
        if let Some(state) = space.paging.as_mut() {
            super::age_resident_pages(state, &mut *space.page_table);
        }
    }

    /// Drops whatever record the process keeps of `vaddr`, after the page has
    /// been unmapped.
    pub fn forget(&self, space: &mut AddressSpace, vaddr: usize) {
        if let Some(state) = space.paging.as_mut() {
            state.forget(page_round_down(vaddr));
        }
    }

    /// Gives a forked child its own view of the parent's paging state. The
    /// child's page table must already mirror the parent's.
    ///
    /// A paged parent's tables are copied verbatim and every swapped page is
    /// copied into a new swap file at the same offset. If the parent never
    /// paged, the child's resident pages are recorded one by one instead.
    pub fn duplicate(
        &self,
        parent: &AddressSpace,
        child_pid: Pid,
        child: &mut AddressSpace,
    ) -> Result<(), SwapError> {
        if !child.paged {
            return Ok(());
        }

        if let (Some(parent_state), Some(parent_file)) = (parent.paging.as_ref(), parent.swap_file) {
            self.ensure_tables(child_pid, child)?;
            let child_file = tables(child_pid, child).swap_file;

            let mut buffer = page_buffer();
            for page in parent_state.swapped().iter().filter(|page| page.in_use) {
                if self.store.read_at(parent_file, &mut buffer, page.offset)? != PAGE_FRAME_SIZE {
                    return Err(SwapIoError::ReadFailed.into());
                }
                if self.store.write_at(child_file, &buffer, page.offset)? != PAGE_FRAME_SIZE {
                    return Err(SwapIoError::WriteFailed.into());
                }
            }
            child.paging = Some(parent_state.clone());
            return Ok(());
        }

        if child.size.div_ceil(PAGE_FRAME_SIZE) > self.max_pages() {
            warn!("pid {child_pid} would start with more than {} pages", self.max_pages());
            return Err(SwapError::SwapSetFull);
        }
        for vaddr in (0..child.size).step_by(PAGE_FRAME_SIZE) {
            let resident = child
                .page_table
                .translate(vaddr)
                .is_ok_and(|entry| entry.is_resident());
            if resident {
                self.on_allocate(child_pid, child, vaddr)?;
            }
        }
        Ok(())
    }

    /// Removes the swap file and paging tables of an exiting process.
    pub fn teardown(&self, pid: Pid, space: &mut AddressSpace) {
        space.paging = None;
        if let Some(handle) = space.swap_file.take() {
            if let Err(error) = self.store.remove(handle) {
                fatal!("removing {} failed: {error}", swap_file_name(pid));
            }
            debug!("removed {}", swap_file_name(pid));
        }
    }
}
