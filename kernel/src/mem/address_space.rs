use super::{page_buffer, page_round_up, PageTable, PAGE_FRAME_SIZE};
use crate::swapping::{Pager, PagingState, SwapError, SwapHandle};
use crate::threading::process::Pid;
use alloc::boxed::Box;
use kestrel_shared::paging::PageTableEntry;
use log::warn;

/// The user half of a process: its page table, its size, and, for processes
/// subject to paging, the paging tables and swap file.
pub struct AddressSpace {
    /// Bytes of user memory, starting at address zero.
    pub size: usize,
    pub page_table: Box<dyn PageTable>,
    /// Subject to demand paging. Fixed when the process is created.
    pub paged: bool,
    pub paging: Option<PagingState>,
    pub swap_file: Option<SwapHandle>,
}

impl AddressSpace {
    pub fn new(page_table: Box<dyn PageTable>, paged: bool) -> Self {
        Self {
            size: 0,
            page_table,
            paged,
            paging: None,
            swap_file: None,
        }
    }

    /// Grows user memory to `new_size` bytes with zeroed, writable pages.
    /// On failure every page added by this call is released again.
    pub fn grow(&mut self, pager: &Pager, pid: Pid, new_size: usize) -> Result<(), SwapError> {
        if new_size <= self.size {
            return Ok(());
        }
        if self.paged && page_round_up(new_size) / PAGE_FRAME_SIZE > pager.max_pages() {
            warn!("pid {pid} asked for more than {} pages", pager.max_pages());
            return Err(SwapError::SwapSetFull);
        }

        let start = page_round_up(self.size);
        for vaddr in (start..new_size).step_by(PAGE_FRAME_SIZE) {
            if let Err(error) = self.map_fresh_page(pager, pid, vaddr) {
                self.release_range(pager, start, vaddr);
                return Err(error);
            }
        }
        self.size = new_size;
        Ok(())
    }

    fn map_fresh_page(&mut self, pager: &Pager, pid: Pid, vaddr: usize) -> Result<(), SwapError> {
        let frame = pager.frames.alloc_frame()?;
        pager.frames.zero_frame(frame);
        if let Err(error) = self
            .page_table
            .map(vaddr, PageTableEntry::user_leaf(frame, true, false))
        {
            pager.frames.free_frame(frame);
            return Err(error.into());
        }
        if let Err(error) = pager.on_allocate(pid, self, vaddr) {
            if let Ok(entry) = self.page_table.unmap(vaddr) {
                pager.frames.free_frame(entry.frame());
            }
            return Err(error);
        }
        Ok(())
    }

    /// Shrinks user memory to `new_size` bytes, releasing pages wherever they
    /// currently live.
    pub fn shrink(&mut self, pager: &Pager, new_size: usize) {
        if new_size >= self.size {
            return;
        }
        self.release_range(pager, page_round_up(new_size), page_round_up(self.size));
        self.size = new_size;
    }

    fn release_range(&mut self, pager: &Pager, start: usize, end: usize) {
        for vaddr in (start..end).step_by(PAGE_FRAME_SIZE) {
            if let Ok(entry) = self.page_table.unmap(vaddr) {
                if entry.is_resident() {
                    pager.frames.free_frame(entry.frame());
                }
                pager.forget(self, vaddr);
            }
        }
    }

    /// Copies this address space's mappings into `child`, which must be empty.
    /// Resident pages get fresh frames with the same contents; paged-out pages
    /// are mapped as paged-out and left for [`Pager::duplicate`].
    pub fn copy_into(&mut self, pager: &Pager, child: &mut AddressSpace) -> Result<(), SwapError> {
        child.size = self.size;
        let mut buffer = page_buffer();
        for vaddr in (0..self.size).step_by(PAGE_FRAME_SIZE) {
            let Ok(&mut entry) = self.page_table.translate(vaddr) else {
                continue;
            };
            if entry.is_resident() {
                let frame = pager.frames.alloc_frame()?;
                pager.frames.read_frame(entry.frame(), &mut buffer);
                pager.frames.write_frame(frame, &buffer);
                if let Err(error) = child
                    .page_table
                    .map(vaddr, entry.with_frame(frame).with_accessed(false))
                {
                    pager.frames.free_frame(frame);
                    return Err(error.into());
                }
            } else {
                child.page_table.map(vaddr, entry)?;
            }
        }
        Ok(())
    }

    /// Releases all user memory and any swap file.
    pub fn free(&mut self, pager: &Pager, pid: Pid) {
        self.release_range(pager, 0, page_round_up(self.size));
        self.size = 0;
        pager.teardown(pid, self);
    }

    /// Performs a user access to `vaddr` the way the MMU would, faulting the
    /// page in if it is paged out. Returns the frame backing the page.
    pub fn access(
        &mut self,
        pager: &Pager,
        pid: Pid,
        vaddr: usize,
        write: bool,
    ) -> Result<usize, SwapError> {
        if vaddr >= self.size {
            return Err(SwapError::Unmapped);
        }
        if self.page_table.translate(vaddr)?.paged_out() {
            pager.on_fault(pid, self, vaddr)?;
        }
        let entry = self.page_table.translate(vaddr)?;
        if write && !entry.writable() {
            return Err(SwapError::Unmapped);
        }
        *entry = entry.with_accessed(true).with_dirty(entry.dirty() || write);
        Ok(entry.frame())
    }

    /// Copies `data` into user memory at `vaddr`.
    pub fn write_bytes(
        &mut self,
        pager: &Pager,
        pid: Pid,
        vaddr: usize,
        data: &[u8],
    ) -> Result<(), SwapError> {
        let mut buffer = page_buffer();
        let mut done = 0;
        while done < data.len() {
            let address = vaddr + done;
            let offset = address % PAGE_FRAME_SIZE;
            let count = (PAGE_FRAME_SIZE - offset).min(data.len() - done);
            let frame = self.access(pager, pid, address, true)?;
            pager.frames.read_frame(frame, &mut buffer);
            buffer[offset..offset + count].copy_from_slice(&data[done..done + count]);
            pager.frames.write_frame(frame, &buffer);
            done += count;
        }
        Ok(())
    }

    /// Copies user memory at `vaddr` into `data`.
    pub fn read_bytes(
        &mut self,
        pager: &Pager,
        pid: Pid,
        vaddr: usize,
        data: &mut [u8],
    ) -> Result<(), SwapError> {
        let mut buffer = page_buffer();
        let mut done = 0;
        while done < data.len() {
            let address = vaddr + done;
            let offset = address % PAGE_FRAME_SIZE;
            let count = (PAGE_FRAME_SIZE - offset).min(data.len() - done);
            let frame = self.access(pager, pid, address, false)?;
            pager.frames.read_frame(frame, &mut buffer);
            data[done..done + count].copy_from_slice(&buffer[offset..offset + count]);
            done += count;
        }
        Ok(())
    }
}
