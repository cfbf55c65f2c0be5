use crate::sizes::KB;

// Sv39 base pages are 4KB.
pub const PAGE_FRAME_SIZE: usize = 4 * KB;

/// One past the highest virtual address Sv39 can express with the sign bit
/// clear. The top page of every address space is the trampoline.
pub const MAX_VIRTUAL_ADDRESS: usize = 1 << (9 + 9 + 9 + 12 - 1);

pub const TRAMPOLINE: usize = MAX_VIRTUAL_ADDRESS - PAGE_FRAME_SIZE;

/// Kernel threads' trap frames live in the pages below the trampoline, one
/// page per thread slot.
#[inline]
pub const fn trap_frame_address(thread_slot: usize) -> usize {
    TRAMPOLINE - (thread_slot + 1) * PAGE_FRAME_SIZE
}

/// Kernel stacks are mapped high in the kernel address space, each followed by
/// an unmapped guard page.
#[inline]
pub const fn kernel_stack_address(index: usize) -> usize {
    TRAMPOLINE - (index + 1) * 2 * PAGE_FRAME_SIZE
}

#[inline]
pub const fn page_round_down(address: usize) -> usize {
    address & !(PAGE_FRAME_SIZE - 1)
}

#[inline]
pub const fn page_round_up(address: usize) -> usize {
    page_round_down(address + PAGE_FRAME_SIZE - 1)
}
