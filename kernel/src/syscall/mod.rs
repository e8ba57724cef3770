//! System-call dispatch
//!
//! A software interrupt lands here with the request number in EAX and up
//! to five arguments in EBX, ECX, EDX, ESI, EDI. Dispatch is a fixed
//! array indexed by number; every entry takes the whole trap frame and
//! extracts its own arguments. The return value is written back into
//! EAX: −1 for every failure, non-negative otherwise. After every
//! non-fatal handler, pending signals are delivered before the return to
//! user mode.
//!
//! Pointer validation rejects null, anything at or above the user/kernel
//! boundary, any buffer whose end crosses the boundary, and arithmetic
//! overflow of `base + len`. Strings are validated by start address; the
//! copy helper bounds them during the walk.

use lazy_static::lazy_static;

use crate::arch::context::TrapFrame;
use crate::error::SyscallError;
use crate::mm::KERNEL_BASE;
use crate::process::Process;

mod fs;
mod gpu;
mod memory;
mod net;
mod process;

pub use self::memory::{MAP_ANONYMOUS, MAP_FIXED, MAP_PRIVATE, PROT_READ, PROT_WRITE};

// Process management
pub const SYS_EXIT: usize = 1;
pub const SYS_GETPID: usize = 2;
pub const SYS_SLEEP: usize = 3;
pub const SYS_SPAWN: usize = 4;
pub const SYS_WAITPID: usize = 5;
pub const SYS_KILL: usize = 6;
pub const SYS_YIELD: usize = 7;

// File handles
pub const SYS_OPEN: usize = 10;
pub const SYS_CLOSE: usize = 11;
pub const SYS_READ: usize = 12;
pub const SYS_WRITE: usize = 13;
pub const SYS_SEEK: usize = 14;
pub const SYS_STAT: usize = 15;
pub const SYS_DUP: usize = 16;
pub const SYS_PIPE: usize = 17;

// Filesystem namespace
pub const SYS_MKDIR: usize = 20;
pub const SYS_UNLINK: usize = 21;
pub const SYS_CHDIR: usize = 22;
pub const SYS_GETCWD: usize = 23;

// Memory
pub const SYS_BRK: usize = 30;
pub const SYS_MMAP: usize = 31;
pub const SYS_MUNMAP: usize = 32;

// UDP sockets
pub const SYS_SOCKET: usize = 40;
pub const SYS_BIND: usize = 41;
pub const SYS_SENDTO: usize = 42;
pub const SYS_RECVFROM: usize = 43;
pub const SYS_CLOSESOCK: usize = 44;

// GPU contexts
pub const SYS_GPU_CREATE_CTX: usize = 50;
pub const SYS_GPU_SUBMIT: usize = 51;
pub const SYS_GPU_DESTROY_CTX: usize = 52;

/// Size of the dispatch table.
pub const NR_SYSCALLS: usize = 64;

/// Uniform handler shape: the whole trap frame in, the EAX value out.
pub type SyscallHandler = fn(&mut TrapFrame) -> isize;

lazy_static! {
    static ref SYSCALL_TABLE: [Option<SyscallHandler>; NR_SYSCALLS] = build_table();
}

fn build_table() -> [Option<SyscallHandler>; NR_SYSCALLS] {
    let mut table: [Option<SyscallHandler>; NR_SYSCALLS] = [None; NR_SYSCALLS];

    table[SYS_EXIT] = Some(process::sys_exit);
    table[SYS_GETPID] = Some(process::sys_getpid);
    table[SYS_SLEEP] = Some(process::sys_sleep);
    table[SYS_SPAWN] = Some(process::sys_spawn);
    table[SYS_WAITPID] = Some(process::sys_waitpid);
    table[SYS_KILL] = Some(process::sys_kill);
    table[SYS_YIELD] = Some(process::sys_yield);

    table[SYS_OPEN] = Some(fs::sys_open);
    table[SYS_CLOSE] = Some(fs::sys_close);
    table[SYS_READ] = Some(fs::sys_read);
    table[SYS_WRITE] = Some(fs::sys_write);
    table[SYS_SEEK] = Some(fs::sys_seek);
    table[SYS_STAT] = Some(fs::sys_stat);
    table[SYS_DUP] = Some(fs::sys_dup);
    table[SYS_PIPE] = Some(fs::sys_pipe);

    table[SYS_MKDIR] = Some(fs::sys_mkdir);
    table[SYS_UNLINK] = Some(fs::sys_unlink);
    table[SYS_CHDIR] = Some(fs::sys_chdir);
    table[SYS_GETCWD] = Some(fs::sys_getcwd);

    table[SYS_BRK] = Some(memory::sys_brk);
    table[SYS_MMAP] = Some(memory::sys_mmap);
    table[SYS_MUNMAP] = Some(memory::sys_munmap);

    table[SYS_SOCKET] = Some(net::sys_socket);
    table[SYS_BIND] = Some(net::sys_bind);
    table[SYS_SENDTO] = Some(net::sys_sendto);
    table[SYS_RECVFROM] = Some(net::sys_recvfrom);
    table[SYS_CLOSESOCK] = Some(net::sys_closesock);

    table[SYS_GPU_CREATE_CTX] = Some(gpu::sys_gpu_create_ctx);
    table[SYS_GPU_SUBMIT] = Some(gpu::sys_gpu_submit);
    table[SYS_GPU_DESTROY_CTX] = Some(gpu::sys_gpu_destroy_ctx);

    table
}

/// Entry point from the int-gate stub.
pub fn dispatch(frame: &mut TrapFrame) {
    let nr = frame.eax as usize;
    let result = match SYSCALL_TABLE.get(nr).copied().flatten() {
        Some(handler) => handler(frame),
        None => {
            log::warn!("unknown syscall {}", nr);
            -1
        }
    };
    frame.eax = result as u32;

    // Post-handler checkpoint: act on anything that arrived while the
    // handler ran (or that the handler itself raised).
    crate::process::signal::deliver_pending();
}

// ---------------------------------------------------------------------------
// Validation and shared handler plumbing
// ---------------------------------------------------------------------------

/// Validate a user buffer `[addr, addr + len)`.
pub fn validate_user_range(addr: u32, len: u32) -> Result<(), SyscallError> {
    if addr == 0 || addr >= KERNEL_BASE {
        return Err(SyscallError::InvalidPointer { addr });
    }
    let end = addr
        .checked_add(len)
        .ok_or(SyscallError::InvalidPointer { addr })?;
    if end > KERNEL_BASE {
        return Err(SyscallError::InvalidPointer { addr });
    }
    Ok(())
}

/// Validate a user string pointer by start address only; the copy bounds
/// the length.
pub fn validate_user_str(addr: u32) -> Result<(), SyscallError> {
    if addr == 0 || addr >= KERNEL_BASE {
        return Err(SyscallError::InvalidPointer { addr });
    }
    Ok(())
}

/// Longest accepted user path/string.
pub(self) const MAX_USER_STRING: usize = 256;

/// Collapse a typed result into the EAX convention.
pub(self) fn ret(result: Result<usize, SyscallError>) -> isize {
    match result {
        Ok(value) => value as isize,
        Err(_) => -1,
    }
}

pub(self) fn current() -> Result<&'static Process, SyscallError> {
    crate::process::current_process().ok_or(SyscallError::InvalidArgument)
}

/// Copy a NUL-terminated string out of the caller's address space.
pub(self) fn read_user_string(
    process: &Process,
    addr: u32,
) -> Result<alloc::string::String, SyscallError> {
    validate_user_str(addr)?;
    let memory = process.memory.lock();
    let space = memory
        .space
        .as_ref()
        .ok_or(SyscallError::InvalidPointer { addr })?;
    crate::mm::uaccess::copy_string_from_user(
        space,
        crate::mm::VirtualAddress::new(addr),
        MAX_USER_STRING,
    )
    .map_err(SyscallError::from)
}

/// Copy bytes into the caller's address space (range already validated).
pub(self) fn write_user_bytes(
    process: &Process,
    addr: u32,
    bytes: &[u8],
) -> Result<(), SyscallError> {
    let memory = process.memory.lock();
    let space = memory
        .space
        .as_ref()
        .ok_or(SyscallError::InvalidPointer { addr })?;
    crate::mm::uaccess::copy_to_user(space, crate::mm::VirtualAddress::new(addr), bytes)
        .map_err(SyscallError::from)
}

/// Copy bytes out of the caller's address space (range already
/// validated).
pub(self) fn read_user_bytes(
    process: &Process,
    addr: u32,
    buf: &mut [u8],
) -> Result<(), SyscallError> {
    let memory = process.memory.lock();
    let space = memory
        .space
        .as_ref()
        .ok_or(SyscallError::InvalidPointer { addr })?;
    crate::mm::uaccess::copy_from_user(space, crate::mm::VirtualAddress::new(addr), buf)
        .map_err(SyscallError::from)
}
