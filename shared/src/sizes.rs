pub const KB: usize = 1024;
pub const MB: usize = KB * KB;

/// Size in bytes of an exit message recorded by a terminating process,
/// including the terminating NUL.
pub const EXIT_MESSAGE_SIZE: usize = 32;
