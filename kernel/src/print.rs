// Print macros for kernel output

/// Print to the kernel console (serial on bare metal, stdout on the host).
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => ($crate::print::_print(format_args!($($arg)*)));
}

/// Print a line to the kernel console.
#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($($arg:tt)*) => ($crate::kprint!("{}\n", format_args!($($arg)*)));
}

#[doc(hidden)]
pub fn _print(args: core::fmt::Arguments) {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    crate::arch::serial::_print(args);

    #[cfg(not(target_os = "none"))]
    {
        use std::io::Write;
        let _ = std::io::stdout().write_fmt(args);
    }
}
