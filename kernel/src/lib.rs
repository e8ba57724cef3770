//! EmberOS Kernel Library
//!
//! Core of a self-hosted 32-bit x86 kernel: the process table and
//! round-robin scheduler, per-process virtual address spaces with a shared
//! kernel high half, and the system-call dispatch boundary. Device drivers,
//! the on-disk filesystem, the UDP stack, the VirtIO GPU transport and the
//! ELF loader are collaborators reached through registered trait objects.
//!
//! The crate builds for two targets: the bare-metal i386 kernel and the
//! host, where the unit test suite runs against a simulated physical
//! memory arena.

#![no_std]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]

extern crate alloc;

// On bare metal the kernel heap is a linked-list allocator over a region
// handed to `mm::heap::init`. On the host target (unit tests, coverage)
// delegate to the system allocator so test code using Vec/String runs
// normally.
#[cfg(target_os = "none")]
use linked_list_allocator::LockedHeap;

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

/// Get a reference to the kernel heap allocator.
#[cfg(target_os = "none")]
pub fn get_allocator() -> &'static LockedHeap {
    &ALLOCATOR
}

#[macro_use]
pub mod print;

pub mod arch;
pub mod elf;
pub mod error;
pub mod fs;
pub mod gpu;
pub mod ipc;
pub mod logger;
pub mod mm;
pub mod net;
pub mod process;
pub mod sched;
pub mod syscall;
pub mod timer;

#[cfg(test)]
pub mod test_support;

// Re-export the types the syscall layer and tests reach for constantly.
pub use error::{KernelError, KernelResult};
pub use mm::{FrameNumber, PhysicalAddress, VirtualAddress, PAGE_SIZE};
pub use process::{Pid, Process, ProcessState};

/// Heap allocation error handler.
///
/// Panic is intentional: heap allocation failure in a no_std kernel is
/// unrecoverable. The alloc_error_handler ABI requires `-> !`.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {:?}", layout);
}
