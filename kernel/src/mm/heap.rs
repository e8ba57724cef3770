//! Kernel heap bring-up
//!
//! The heap region lives in the kernel half and is handed to the
//! linked-list allocator once boot has mapped it. The host target runs on
//! the system allocator and needs no bring-up.

/// Initialize the kernel heap over `[start, start + size)`.
///
/// # Safety
/// The range must be mapped, writable, unused by anything else, and this
/// must be called exactly once.
#[cfg(target_os = "none")]
pub unsafe fn init(start: usize, size: usize) {
    // SAFETY: forwarded under the caller's contract.
    unsafe {
        crate::get_allocator().lock().init(start as *mut u8, size);
    }
    log::info!("heap: {} KiB at 0x{:08x}", size / 1024, start);
}

/// Host builds use the system allocator; nothing to do.
#[cfg(not(target_os = "none"))]
pub fn init(_start: usize, _size: usize) {}
