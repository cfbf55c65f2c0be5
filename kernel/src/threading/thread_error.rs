use crate::swapping::SwapError;
use core::{
    error::Error,
    fmt::{Debug, Display, Formatter},
};

/// Error type for process and kernel thread operations. None of these leave
/// the kernel in a bad state.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ThreadError {
    /// Every slot in the process or thread table is taken
    NoFreeSlot,
    NoSuchThread,
    NoSuchProcess,
    /// The caller has no children to wait for
    NoChildren,
    /// The caller was killed while blocked
    Killed,
    InvalidArgument,
    Memory(SwapError),
}

impl Debug for ThreadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            ThreadError::NoFreeSlot => write!(f, "NoFreeSlot"),
            ThreadError::NoSuchThread => write!(f, "NoSuchThread"),
            ThreadError::NoSuchProcess => write!(f, "NoSuchProcess"),
            ThreadError::NoChildren => write!(f, "NoChildren"),
            ThreadError::Killed => write!(f, "Killed"),
            ThreadError::InvalidArgument => write!(f, "InvalidArgument"),
            ThreadError::Memory(error) => write!(f, "Memory({error:?})"),
        }
    }
}

impl Display for ThreadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl Error for ThreadError {
    fn description(&self) -> &str {
        match self {
            ThreadError::NoFreeSlot => "No free slot",
            ThreadError::NoSuchThread => "No such kernel thread",
            ThreadError::NoSuchProcess => "No such process",
            ThreadError::NoChildren => "No children to wait for",
            ThreadError::Killed => "Killed while blocked",
            ThreadError::InvalidArgument => "Invalid argument",
            ThreadError::Memory(_) => "User memory operation failed",
        }
    }

    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ThreadError::Memory(error) => Some(error),
            _ => None,
        }
    }
}

impl From<SwapError> for ThreadError {
    fn from(error: SwapError) -> Self {
        ThreadError::Memory(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_errors_keep_their_cause() {
        let error = ThreadError::from(SwapError::OutOfMemory);
        assert_eq!(error, ThreadError::Memory(SwapError::OutOfMemory));
        assert!(error.source().is_some());
        assert!(ThreadError::NoChildren.source().is_none());
    }
}
