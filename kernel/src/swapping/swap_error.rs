use crate::mem::{OutOfMemory, PagingError};
use core::error::Error;
use core::fmt::{Debug, Display, Formatter};

/// Failure reported by a swap file's backing store.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum SwapIoError {
    /// No swap file exists for the handle
    NoSuchFile,
    /// The store could not create another swap file
    CreateFailed,
    ReadFailed,
    WriteFailed,
}

impl Debug for SwapIoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            SwapIoError::NoSuchFile => write!(f, "NoSuchFile"),
            SwapIoError::CreateFailed => write!(f, "CreateFailed"),
            SwapIoError::ReadFailed => write!(f, "ReadFailed"),
            SwapIoError::WriteFailed => write!(f, "WriteFailed"),
        }
    }
}

impl Display for SwapIoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl Error for SwapIoError {
    fn description(&self) -> &str {
        match self {
            SwapIoError::NoSuchFile => "No swap file for this handle",
            SwapIoError::CreateFailed => "Could not create a swap file",
            SwapIoError::ReadFailed => "Error reading from the swap file",
            SwapIoError::WriteFailed => "Error writing to the swap file",
        }
    }
}

/// Error type for paging bookkeeping and address space operations
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum SwapError {
    /// Every resident-page entry is in use
    ResidentSetFull,
    /// Every swap-slot entry is in use
    SwapSetFull,
    /// The page is not recorded as swapped out
    NotSwapped,
    /// No physical frame was available
    OutOfMemory,
    /// Nothing is mapped at the address
    Unmapped,
    /// The address is already mapped
    AlreadyMapped,
    Io(SwapIoError),
}

impl Debug for SwapError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            SwapError::ResidentSetFull => write!(f, "ResidentSetFull"),
            SwapError::SwapSetFull => write!(f, "SwapSetFull"),
            SwapError::NotSwapped => write!(f, "NotSwapped"),
            SwapError::OutOfMemory => write!(f, "OutOfMemory"),
            SwapError::Unmapped => write!(f, "Unmapped"),
            SwapError::AlreadyMapped => write!(f, "AlreadyMapped"),
            SwapError::Io(error) => write!(f, "Io({error:?})"),
        }
    }
}

impl Display for SwapError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl Error for SwapError {
    fn description(&self) -> &str {
        match self {
            SwapError::ResidentSetFull => "Resident-page table is full",
            SwapError::SwapSetFull => "Swap-slot table is full",
            SwapError::NotSwapped => "Page is not in the swap file",
            SwapError::OutOfMemory => "Out of physical frames",
            SwapError::Unmapped => "Address is not mapped",
            SwapError::AlreadyMapped => "Address is already mapped",
            SwapError::Io(_) => "Swap file I/O failed",
        }
    }
}

impl From<SwapIoError> for SwapError {
    fn from(error: SwapIoError) -> Self {
        SwapError::Io(error)
    }
}

impl From<OutOfMemory> for SwapError {
    fn from(_: OutOfMemory) -> Self {
        SwapError::OutOfMemory
    }
}

impl From<PagingError> for SwapError {
    fn from(error: PagingError) -> Self {
        match error {
            PagingError::Unmapped => SwapError::Unmapped,
            PagingError::AlreadyMapped => SwapError::AlreadyMapped,
            PagingError::OutOfMemory => SwapError::OutOfMemory,
        }
    }
}
