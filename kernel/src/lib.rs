#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

/// Logs a broken kernel invariant and halts.
macro_rules! fatal {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
        panic!($($arg)*)
    }};
}

pub mod config;
pub mod mem;
pub mod swapping;
pub mod sync;
pub mod system;
pub mod threading;
pub mod timer;

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(args: &core::panic::PanicInfo) -> ! {
    kestrel_shared::eprintln!("{}", args);
    loop {}
}

