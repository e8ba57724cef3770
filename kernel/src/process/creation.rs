//! Task creation
//!
//! Kernel threads share the kernel address space and start at a plain
//! function; user processes carry their own address space and enter ring
//! 3 through a constructed trap frame. Both get a record in the arena, a
//! fresh kernel stack with the first-dispatch context built on it, and a
//! place on the ready queue.

use alloc::string::String;

use super::memory::ProcessMemory;
use super::pcb::{Pid, Process, ProcessState};
use super::table::{self, PROCESS_TABLE};
use super::MAX_PROCESSES;
use crate::arch::context;
use crate::error::{KernelError, KernelResult};
use crate::mm::VirtualAddress;
use crate::sched;

/// Entry signature for kernel threads. They never return; a finished
/// worker calls `exit_current` itself.
pub type KernelThreadEntry = extern "C" fn() -> !;

fn table_has_room() -> bool {
    // Slot 0 is reserved.
    table::process_count() < MAX_PROCESSES - 1
}

fn install(process: Process) -> KernelResult<&'static Process> {
    let installed = PROCESS_TABLE.insert(process)?;
    installed.set_state(ProcessState::Ready);
    sched::enqueue_ready(installed.pid);
    Ok(installed)
}

/// Spawn a kernel thread. The saved context makes the first dispatch
/// enable interrupts and call `entry` on the fresh kernel stack.
pub fn create_kernel_thread(name: &str, entry: KernelThreadEntry) -> KernelResult<&'static Process> {
    if !table_has_room() {
        return Err(KernelError::ResourceExhausted {
            resource: "process table",
        });
    }

    let pid = super::alloc_pid();
    let parent = sched::current_pid().unwrap_or(Pid(0));
    let process = Process::new(pid, parent, String::from(name), ProcessMemory::new_kernel());

    let context = context::kernel_thread_context(process.kstack.top(), entry as usize);
    // SAFETY: the record is not yet shared; this is the only reference.
    unsafe {
        *process.context.get() = context;
    }

    install(process)
}

/// Spawn a user process over an already-built memory image.
///
/// The saved frame targets ring 3 with interrupts enabled, instruction
/// pointer `entry` and stack pointer `stack`. The parent's file handles
/// are inherited (shared entries, refcounts bumped). On failure the
/// memory image is released, frames included.
pub fn create_user_process(
    name: &str,
    mut memory: ProcessMemory,
    entry: VirtualAddress,
    stack: VirtualAddress,
    parent: Pid,
) -> KernelResult<&'static Process> {
    if memory.space.is_none() {
        memory.release();
        return Err(KernelError::InvalidState {
            expected: "user address space",
            actual: "kernel thread memory",
        });
    }
    if !table_has_room() {
        memory.release();
        return Err(KernelError::ResourceExhausted {
            resource: "process table",
        });
    }

    let pid = super::alloc_pid();
    let process = Process::new(pid, parent, String::from(name), memory);

    let context =
        context::user_process_context(process.kstack.top(), entry.as_u32(), stack.as_u32());
    // SAFETY: the record is not yet shared; this is the only reference.
    unsafe {
        *process.context.get() = context;
    }

    if let Some(parent_process) = table::get_process(parent) {
        *process.files.lock() = parent_process.files.lock().inherit();
    }

    install(process)
}

/// Record for the boot context itself: it is already running on the boot
/// stack with the kernel address space, so it gets no constructed
/// context and no ready-queue entry.
pub fn create_idle_task() -> KernelResult<&'static Process> {
    let pid = super::alloc_pid();
    let process = Process::new(pid, Pid(0), String::from("idle"), ProcessMemory::new_kernel());
    let installed = PROCESS_TABLE.insert(process)?;
    installed.set_state(ProcessState::Running);
    Ok(installed)
}
