pub mod address_space;
pub mod frame_allocator;
pub mod page_table;

pub use address_space::AddressSpace;
pub use frame_allocator::FramePool;
pub use kestrel_shared::mem::{page_round_down, page_round_up, PAGE_FRAME_SIZE};
pub use page_table::{PageTable, PagingError, SoftPageTable};

use alloc::{boxed::Box, vec};
use core::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutOfMemory;

impl fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("out of physical frames")
    }
}

/// Physical memory, handed out one page frame at a time. Frames are named by
/// their physical frame number, the same number a page table entry stores.
pub trait FrameAllocator: Send + Sync {
    fn alloc_frame(&self) -> Result<usize, OutOfMemory>;

    /// Returns `frame` to the pool. Freeing a frame that is not allocated is a
    /// kernel bug and panics.
    fn free_frame(&self, frame: usize);

    /// Copies the whole of `frame` into `buffer`, which must be one page long.
    fn read_frame(&self, frame: usize, buffer: &mut [u8]);

    /// Overwrites the whole of `frame` with `buffer`, which must be one page long.
    fn write_frame(&self, frame: usize, buffer: &[u8]);

    fn free_frames(&self) -> usize;

    fn zero_frame(&self, frame: usize) {
        self.write_frame(frame, &page_buffer());
    }
}

/// A zeroed page-sized buffer. Pages are shuffled through the heap rather
/// than the (small) kernel stack.
pub fn page_buffer() -> Box<[u8]> {
    vec![0; PAGE_FRAME_SIZE].into_boxed_slice()
}
