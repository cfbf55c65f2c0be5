use super::{FrameAllocator, OutOfMemory, PAGE_FRAME_SIZE};
use crate::sync::mutex::Mutex;
use alloc::{boxed::Box, vec};
use bitbybit::bitfield;

#[bitfield(u8, default = 0)]
pub struct CoreMapEntry {
    #[bit(0, rw)]
    allocated: bool,
}

struct PoolInner {
    core_map: Box<[CoreMapEntry]>,
    memory: Box<[u8]>,
    /// Where the next-fit search resumes.
    position: usize,
    frames_allocated: usize,
}

/// A fixed pool of page frames tracked by a core map. Single frames are placed
/// next-fit, so recently freed frames are not immediately reused.
pub struct FramePool {
    first_frame: usize,
    inner: Mutex<PoolInner>,
}

impl FramePool {
    /// Physical RAM starts at 0x8000_0000 on the machines we target.
    pub const RAM_FIRST_FRAME: usize = 0x8000_0000 / PAGE_FRAME_SIZE;

    pub fn new(frames: usize) -> Self {
        Self::with_first_frame(Self::RAM_FIRST_FRAME, frames)
    }

    pub fn with_first_frame(first_frame: usize, frames: usize) -> Self {
        Self {
            first_frame,
            inner: Mutex::new(PoolInner {
                core_map: vec![CoreMapEntry::DEFAULT; frames].into_boxed_slice(),
                memory: vec![0; frames * PAGE_FRAME_SIZE].into_boxed_slice(),
                position: 0,
                frames_allocated: 0,
            }),
        }
    }

    pub fn is_allocated(&self, frame: usize) -> bool {
        let index = self.index_of(frame);
        self.inner.lock().core_map[index].allocated()
    }

    fn index_of(&self, frame: usize) -> usize {
        let total = self.inner.lock().core_map.len();
        assert!(
            (self.first_frame..self.first_frame + total).contains(&frame),
            "frame {frame:#x} is outside the pool"
        );
        frame - self.first_frame
    }

    fn byte_range(index: usize) -> core::ops::Range<usize> {
        index * PAGE_FRAME_SIZE..(index + 1) * PAGE_FRAME_SIZE
    }
}

impl FrameAllocator for FramePool {
    fn alloc_frame(&self) -> Result<usize, OutOfMemory> {
        let mut inner = self.inner.lock();
        let total = inner.core_map.len();
        if inner.frames_allocated == total {
            return Err(OutOfMemory);
        }

        let start = inner.position;
        let index = (0..total)
            .map(|offset| (start + offset) % total)
            .find(|&index| !inner.core_map[index].allocated())
            .ok_or(OutOfMemory)?;

        inner.core_map[index] = inner.core_map[index].with_allocated(true);
        inner.position = (index + 1) % total;
        inner.frames_allocated += 1;
        Ok(self.first_frame + index)
    }

    fn free_frame(&self, frame: usize) {
        let index = self.index_of(frame);
        let mut inner = self.inner.lock();
        let entry = inner.core_map[index];
        assert!(entry.allocated(), "freeing free frame {frame:#x}");
        inner.core_map[index] = entry.with_allocated(false);
        inner.frames_allocated -= 1;
    }

    fn read_frame(&self, frame: usize, buffer: &mut [u8]) {
        let index = self.index_of(frame);
        let inner = self.inner.lock();
        buffer.copy_from_slice(&inner.memory[Self::byte_range(index)]);
    }

    fn write_frame(&self, frame: usize, buffer: &[u8]) {
        let index = self.index_of(frame);
        let mut inner = self.inner.lock();
        inner.memory[Self::byte_range(index)].copy_from_slice(buffer);
    }

    fn free_frames(&self) -> usize {
        let inner = self.inner.lock();
        inner.core_map.len() - inner.frames_allocated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_fit_skips_recently_freed() {
        let pool = FramePool::with_first_frame(100, 4);
        let a = pool.alloc_frame().expect("free frame");
        let b = pool.alloc_frame().expect("free frame");
        assert_eq!((a, b), (100, 101));

        pool.free_frame(a);
        assert_eq!(pool.alloc_frame(), Ok(102));
        assert_eq!(pool.alloc_frame(), Ok(103));
        // Wraps around to the only free frame.
        assert_eq!(pool.alloc_frame(), Ok(100));
        assert_eq!(pool.alloc_frame(), Err(OutOfMemory));
    }

    #[test]
    fn frame_contents() {
        let pool = FramePool::new(1);
        let frame = pool.alloc_frame().expect("free frame");
        let mut page = super::super::page_buffer();
        page[7] = 0xAB;
        pool.write_frame(frame, &page);

        let mut out = super::super::page_buffer();
        pool.read_frame(frame, &mut out);
        assert_eq!(out[7], 0xAB);

        pool.zero_frame(frame);
        pool.read_frame(frame, &mut out);
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    #[should_panic(expected = "freeing free frame")]
    fn double_free_panics() {
        let pool = FramePool::new(1);
        let frame = pool.alloc_frame().expect("free frame");
        pool.free_frame(frame);
        pool.free_frame(frame);
    }
}
