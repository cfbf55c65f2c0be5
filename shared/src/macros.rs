//! Console output. On bare metal everything goes to the UART; hosted builds
//! (the unit tests) go through the standard streams instead.

use core::fmt;

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    #[cfg(target_os = "none")]
    {
        use core::fmt::Write;
        // Writing to the UART cannot fail.
        let _ = crate::serial::SerialPort.write_fmt(args);
    }
    #[cfg(not(target_os = "none"))]
    std::print!("{args}");
}

#[doc(hidden)]
pub fn _eprint(args: fmt::Arguments) {
    #[cfg(target_os = "none")]
    _print(args);
    #[cfg(not(target_os = "none"))]
    std::eprint!("{args}");
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::macros::_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println {
    () => {
        $crate::print!("\n")
    };
    ($($arg:tt)*) => {
        $crate::macros::_print(format_args!("{}\n", format_args!($($arg)*)))
    };
}

#[macro_export]
macro_rules! eprint {
    ($($arg:tt)*) => {
        $crate::macros::_eprint(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! eprintln {
    () => {
        $crate::eprint!("\n")
    };
    ($($arg:tt)*) => {
        $crate::macros::_eprint(format_args!("{}\n", format_args!($($arg)*)))
    };
}
