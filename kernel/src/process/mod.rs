//! Process management module
//!
//! Task records in a fixed arena, creation of kernel threads and user
//! processes, the exit/reap lifecycle, the wait/signal layer, and the
//! synchronization primitives built on wait queues.

use core::sync::atomic::{AtomicU32, Ordering};

pub mod creation;
pub mod exit;
pub mod memory;
pub mod pcb;
pub mod signal;
pub mod sync;
pub mod table;
pub mod wait;

pub use creation::{create_kernel_thread, create_user_process};
pub use memory::{ProcessMemory, Vma};
pub use pcb::{Pid, Process, ProcessState};
pub use sync::WaitQueue;

/// Maximum number of concurrent processes. Slot 0 of the table is
/// reserved, so the effective limit is one less.
pub const MAX_PROCESSES: usize = 64;

/// Per-process VMA vector capacity.
pub const MAX_VMAS: usize = 16;

/// Kernel stack size per task.
pub const KSTACK_SIZE: usize = 16 * 1024;

/// PID allocator
static NEXT_PID: AtomicU32 = AtomicU32::new(1);

/// Allocate a fresh, never-zero PID.
pub fn alloc_pid() -> Pid {
    Pid(NEXT_PID.fetch_add(1, Ordering::Relaxed))
}

/// The currently running process, if the scheduler has one.
pub fn current_process() -> Option<&'static Process> {
    table::get_process(crate::sched::current_pid()?)
}

/// Initialize the process subsystem: the table plus the idle/bootstrap
/// task that adopts the boot context and the kernel address space.
pub fn init() -> crate::KernelResult<()> {
    table::init();
    let idle = creation::create_idle_task()?;
    crate::sched::adopt_current(idle.pid);
    log::info!("process: idle task is pid {}", idle.pid);
    Ok(())
}
