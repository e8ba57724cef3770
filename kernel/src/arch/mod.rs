//! Architecture support
//!
//! The kernel proper is single-architecture (i386). The `host` module
//! provides the same surface for the host target so the subsystem logic
//! and its unit tests compile and run there: the interrupt guard becomes a
//! counter, TLB maintenance a no-op, `halt` advances the tick counter, and
//! physical frames live in a static arena.

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod x86;

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use x86::*;

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub mod host;

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub use host::*;

// Common context module (trap frame layout, saved kernel context)
pub mod context;

/// Kernel code segment selector
pub const KERNEL_CS: u16 = 0x08;
/// Kernel data segment selector
pub const KERNEL_DS: u16 = 0x10;
/// User code segment selector (RPL 3)
pub const USER_CS: u16 = 0x1b;
/// User data segment selector (RPL 3)
pub const USER_DS: u16 = 0x23;

/// EFLAGS with the interrupt flag set, the state new tasks start in.
pub const EFLAGS_IF: u32 = 0x202;
