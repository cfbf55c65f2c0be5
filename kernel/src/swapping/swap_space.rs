use super::SwapIoError;
use crate::sync::mutex::Mutex;
use crate::threading::process::Pid;
use alloc::{collections::BTreeMap, format, string::String, vec::Vec};

/// Names one process's swap file within a [`BackingStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SwapHandle(u32);

/// Where evicted pages go. Each paged process gets its own swap file, created
/// lazily and removed when the process exits.
pub trait BackingStore: Send + Sync {
    fn create(&self, pid: Pid) -> Result<SwapHandle, SwapIoError>;
    fn remove(&self, handle: SwapHandle) -> Result<(), SwapIoError>;

    /// Reads up to `buffer.len()` bytes starting at `offset`, returning how
    /// many were read. Reading past the end of the file reads nothing.
    fn read_at(
        &self,
        handle: SwapHandle,
        buffer: &mut [u8],
        offset: usize,
    ) -> Result<usize, SwapIoError>;

    /// Writes `buffer` at `offset`, growing the file as needed.
    fn write_at(&self, handle: SwapHandle, buffer: &[u8], offset: usize)
        -> Result<usize, SwapIoError>;
}

pub fn swap_file_name(pid: Pid) -> String {
    format!("/.swap{pid}")
}

/// Failures a [`MemoryBackingStore`] can be told to produce.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InjectedFaults {
    pub create: bool,
    pub read: bool,
    pub write: bool,
    /// Reads return at most this many bytes.
    pub short_read: Option<usize>,
}

struct SwapFile {
    pid: Pid,
    data: Vec<u8>,
}

#[derive(Default)]
struct StoreInner {
    files: BTreeMap<SwapHandle, SwapFile>,
    next_handle: u32,
    faults: InjectedFaults,
}

/// Swap files held in kernel memory.
#[derive(Default)]
pub struct MemoryBackingStore {
    inner: Mutex<StoreInner>,
}

impl MemoryBackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&self, faults: InjectedFaults) {
        self.inner.lock().faults = faults;
    }

    pub fn file_count(&self) -> usize {
        self.inner.lock().files.len()
    }

    pub fn owner(&self, handle: SwapHandle) -> Option<Pid> {
        self.inner.lock().files.get(&handle).map(|file| file.pid)
    }

    pub fn file_len(&self, handle: SwapHandle) -> Option<usize> {
        self.inner.lock().files.get(&handle).map(|file| file.data.len())
    }
}

impl BackingStore for MemoryBackingStore {
    fn create(&self, pid: Pid) -> Result<SwapHandle, SwapIoError> {
        let mut inner = self.inner.lock();
        if inner.faults.create {
            return Err(SwapIoError::CreateFailed);
        }
        let handle = SwapHandle(inner.next_handle);
        inner.next_handle += 1;
        inner.files.insert(
            handle,
            SwapFile {
                pid,
                data: Vec::new(),
            },
        );
        Ok(handle)
    }

    fn remove(&self, handle: SwapHandle) -> Result<(), SwapIoError> {
        self.inner
            .lock()
            .files
            .remove(&handle)
            .map(|_| ())
            .ok_or(SwapIoError::NoSuchFile)
    }

    fn read_at(
        &self,
        handle: SwapHandle,
        buffer: &mut [u8],
        offset: usize,
    ) -> Result<usize, SwapIoError> {
        let inner = self.inner.lock();
        if inner.faults.read {
            return Err(SwapIoError::ReadFailed);
        }
        let file = inner.files.get(&handle).ok_or(SwapIoError::NoSuchFile)?;
        let available = file.data.len().saturating_sub(offset);
        let count = buffer
            .len()
            .min(available)
            .min(inner.faults.short_read.unwrap_or(usize::MAX));
        if count == 0 {
            return Ok(0);
        }
        buffer[..count].copy_from_slice(&file.data[offset..offset + count]);
        Ok(count)
    }

    fn write_at(
        &self,
        handle: SwapHandle,
        buffer: &[u8],
        offset: usize,
    ) -> Result<usize, SwapIoError> {
        let mut inner = self.inner.lock();
        if inner.faults.write {
            return Err(SwapIoError::WriteFailed);
        }
        let file = inner.files.get_mut(&handle).ok_or(SwapIoError::NoSuchFile)?;
        let end = offset + buffer.len();
        if file.data.len() < end {
            file.data.resize(end, 0);
        }
        file.data[offset..end].copy_from_slice(buffer);
        Ok(buffer.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_are_independent() {
        let store = MemoryBackingStore::new();
        let a = store.create(3).expect("create");
        let b = store.create(4).expect("create");
        assert_ne!(a, b);
        assert_eq!(store.owner(b), Some(4));

        assert_eq!(store.write_at(a, &[1, 2, 3], 8), Ok(3));
        assert_eq!(store.file_len(a), Some(11));
        assert_eq!(store.file_len(b), Some(0));

        let mut buffer = [0; 4];
        assert_eq!(store.read_at(a, &mut buffer, 8), Ok(3));
        assert_eq!(buffer, [1, 2, 3, 0]);
        assert_eq!(store.read_at(b, &mut buffer, 0), Ok(0));
    }

    #[test]
    fn removed_files_are_gone() {
        let store = MemoryBackingStore::new();
        let handle = store.create(3).expect("create");
        assert_eq!(store.remove(handle), Ok(()));
        assert_eq!(store.remove(handle), Err(SwapIoError::NoSuchFile));
        assert_eq!(store.write_at(handle, &[0], 0), Err(SwapIoError::NoSuchFile));
        assert_eq!(store.file_count(), 0);
    }

    #[test]
    fn injected_faults() {
        let store = MemoryBackingStore::new();
        let handle = store.create(3).expect("create");
        store.write_at(handle, &[9; 16], 0).expect("write");

        store.inject(InjectedFaults {
            short_read: Some(4),
            ..Default::default()
        });
        let mut buffer = [0; 16];
        assert_eq!(store.read_at(handle, &mut buffer, 0), Ok(4));

        store.inject(InjectedFaults {
            write: true,
            create: true,
            ..Default::default()
        });
        assert_eq!(store.write_at(handle, &[0], 0), Err(SwapIoError::WriteFailed));
        assert_eq!(store.create(5), Err(SwapIoError::CreateFailed));
    }
}
