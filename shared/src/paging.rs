// https://github.com/riscv/riscv-isa-manual/blob/main/src/supervisor.adoc#sv39

// Frame numbers are at most 44 bits wide and only ever hosted on 64-bit harts,
// so narrowing them to usize never truncates.
#![allow(clippy::cast_possible_truncation)]

use arbitrary_int::u44;
use bitbybit::bitfield;

/// An Sv39 leaf page table entry. Bit 9 is one of the two bits the hardware
/// reserves for software; the kernel uses it to mark pages that currently live
/// in their process's swap file.
#[bitfield(u64, default = 0)]
pub struct PageTableEntry {
    #[bit(0, rw)]
    valid: bool,
    #[bit(1, rw)]
    readable: bool,
    #[bit(2, rw)]
    writable: bool,
    #[bit(3, rw)]
    executable: bool,
    #[bit(4, rw)]
    user: bool,
    #[bit(5, rw)]
    global: bool,
    #[bit(6, rw)]
    accessed: bool,
    #[bit(7, rw)]
    dirty: bool,
    #[bit(9, rw)]
    paged_out: bool,
    #[bits(10..=53, rw)]
    page_number: u44,
}

impl PageTableEntry {
    /// A valid user leaf mapping `frame`.
    pub fn user_leaf(frame: usize, writable: bool, executable: bool) -> Self {
        Self::DEFAULT
            .with_valid(true)
            .with_readable(true)
            .with_writable(writable)
            .with_executable(executable)
            .with_user(true)
            .with_frame(frame)
    }

    pub fn frame(&self) -> usize {
        self.page_number().value() as usize
    }

    pub fn with_frame(&self, frame: usize) -> Self {
        self.with_page_number(u44::new(frame as u64))
    }

    /// The entry maps something, either in memory or in swap.
    pub fn is_mapped(&self) -> bool {
        self.valid() || self.paged_out()
    }

    pub fn is_resident(&self) -> bool {
        self.valid() && !self.paged_out()
    }
}
