use super::page_round_down;
use alloc::{collections::BTreeMap, vec::Vec};
use core::fmt;
use kestrel_shared::mem::PAGE_FRAME_SIZE;
pub use kestrel_shared::paging::PageTableEntry;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PagingError {
    /// Nothing is mapped at the address, neither in memory nor in swap.
    Unmapped,
    AlreadyMapped,
    /// An intermediate page table page could not be allocated.
    OutOfMemory,
}

impl fmt::Display for PagingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl core::error::Error for PagingError {}

/// A process's translation table. Implementors only provide the walk and the
/// TLB hook; mapping policy lives in the provided methods.
pub trait PageTable: Send {
    /// Finds the leaf entry for the page containing `vaddr`, creating the
    /// intermediate levels on the way down if `alloc` is set.
    fn walk(&mut self, vaddr: usize, alloc: bool) -> Option<&mut PageTableEntry>;

    /// Drops the leaf entry for `vaddr` from the table, returning what it held.
    fn remove(&mut self, vaddr: usize) -> Option<PageTableEntry>;

    /// Invalidates any cached translation for `vaddr` on this hart.
    fn flush_tlb_entry(&mut self, vaddr: usize);

    /// The entry for a page that is mapped, whether resident or paged out.
    fn translate(&mut self, vaddr: usize) -> Result<&mut PageTableEntry, PagingError> {
        match self.walk(page_round_down(vaddr), false) {
            Some(entry) if entry.is_mapped() => Ok(entry),
            _ => Err(PagingError::Unmapped),
        }
    }

    fn map(&mut self, vaddr: usize, entry: PageTableEntry) -> Result<(), PagingError> {
        let slot = self
            .walk(page_round_down(vaddr), true)
            .ok_or(PagingError::OutOfMemory)?;
        if slot.is_mapped() {
            return Err(PagingError::AlreadyMapped);
        }
        *slot = entry;
        Ok(())
    }

    fn unmap(&mut self, vaddr: usize) -> Result<PageTableEntry, PagingError> {
        let vaddr = page_round_down(vaddr);
        match self.remove(vaddr) {
            Some(entry) if entry.is_mapped() => {
                self.flush_tlb_entry(vaddr);
                Ok(entry)
            }
            _ => Err(PagingError::Unmapped),
        }
    }
}

/// A page table kept as a map from page number to leaf entry, for hosts with
/// no MMU to program. It records the flushes it is asked to do.
#[derive(Default)]
pub struct SoftPageTable {
    entries: BTreeMap<usize, PageTableEntry>,
    flushed: Vec<usize>,
}

impl SoftPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the accessed bit the way the hardware walker would on a load.
    pub fn touch(&mut self, vaddr: usize) {
        if let Some(entry) = self.walk(vaddr, false) {
            if entry.is_resident() {
                *entry = entry.with_accessed(true);
            }
        }
    }

    pub fn flushed(&self) -> &[usize] {
        &self.flushed
    }
}

impl PageTable for SoftPageTable {
    fn walk(&mut self, vaddr: usize, alloc: bool) -> Option<&mut PageTableEntry> {
        let page = vaddr / PAGE_FRAME_SIZE;
        if alloc {
            Some(self.entries.entry(page).or_insert(PageTableEntry::DEFAULT))
        } else {
            self.entries.get_mut(&page)
        }
    }

    fn remove(&mut self, vaddr: usize) -> Option<PageTableEntry> {
        self.entries.remove(&(vaddr / PAGE_FRAME_SIZE))
    }

    fn flush_tlb_entry(&mut self, vaddr: usize) {
        self.flushed.push(page_round_down(vaddr));
    }
}

/// The MMU-backed table: a three-level Sv39 tree whose table pages come from
/// the kernel heap, which is identity mapped.
#[cfg(all(target_os = "none", target_arch = "riscv64"))]
pub mod sv39 {
    use super::{PageTable, PageTableEntry};
    use alloc::boxed::Box;
    use kestrel_shared::mem::PAGE_FRAME_SIZE;

    const ENTRIES: usize = PAGE_FRAME_SIZE / core::mem::size_of::<PageTableEntry>();

    #[repr(C, align(4096))]
    struct TablePage([PageTableEntry; ENTRIES]);

    pub struct Sv39PageTable {
        root: Box<TablePage>,
    }

    fn index(vaddr: usize, level: usize) -> usize {
        (vaddr >> (12 + 9 * level)) & 0x1ff
    }

    impl Sv39PageTable {
        pub fn new() -> Self {
            Self {
                root: Box::new(TablePage([PageTableEntry::DEFAULT; ENTRIES])),
            }
        }

        /// The `satp` value that activates this table.
        pub fn satp(&self) -> usize {
            const MODE_SV39: usize = 8 << 60;
            MODE_SV39 | (&*self.root as *const TablePage as usize / PAGE_FRAME_SIZE)
        }
    }

    impl Default for Sv39PageTable {
        fn default() -> Self {
            Self::new()
        }
    }

    impl PageTable for Sv39PageTable {
        fn walk(&mut self, vaddr: usize, alloc: bool) -> Option<&mut PageTableEntry> {
            let mut table: *mut TablePage = &mut *self.root;
            for level in [2, 1] {
                // SAFETY: `table` is either the root or a page leaked below,
                // both of which live as long as this page table.
                let entry = unsafe { &mut (*table).0[index(vaddr, level)] };
                if !entry.valid() {
                    if !alloc {
                        return None;
                    }
                    let page = Box::leak(Box::new(TablePage([PageTableEntry::DEFAULT; ENTRIES])));
                    let frame = page as *mut TablePage as usize / PAGE_FRAME_SIZE;
                    *entry = PageTableEntry::DEFAULT.with_valid(true).with_frame(frame);
                }
                table = (entry.frame() * PAGE_FRAME_SIZE) as *mut TablePage;
            }
            // SAFETY: As above.
            Some(unsafe { &mut (*table).0[index(vaddr, 0)] })
        }

        fn remove(&mut self, vaddr: usize) -> Option<PageTableEntry> {
            let entry = self.walk(vaddr, false)?;
            let old = *entry;
            *entry = PageTableEntry::DEFAULT;
            Some(old)
        }

        fn flush_tlb_entry(&mut self, vaddr: usize) {
            // SAFETY: sfence.vma only drops cached translations.
            unsafe { core::arch::asm!("sfence.vma {}, zero", in(reg) vaddr) };
        }
    }
}
