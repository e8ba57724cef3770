//! Core scheduling loop
//!
//! The current-task pointer and every transition through it happen with
//! interrupts disabled, so the timer can never observe a half-updated
//! scheduler. Picking the next task is strictly round-robin off the
//! ready queue; address-space roots are loaded only for tasks that own
//! one (kernel threads run on whichever root is live, which is always
//! valid because the kernel half is shared).

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, Ordering};

use super::queue::READY_QUEUE;
use crate::arch::context::{self, Context, TrapFrame};
use crate::arch::IrqGuard;
use crate::process::{self, table, Pid, ProcessState};
use crate::timer;

/// PID of the running task; 0 before the idle task is adopted.
static CURRENT: AtomicU32 = AtomicU32::new(0);

/// Orphaned zombie awaiting collection once its stack is off-CPU.
static REAP_PENDING: AtomicU32 = AtomicU32::new(0);

/// Landing pad for the very first switch away from a context that has no
/// process record (the boot path on bare metal, plain test code on the
/// host).
struct BootContext(UnsafeCell<Context>);

// SAFETY: written only inside the scheduler's interrupt-disabled switch.
unsafe impl Sync for BootContext {}

static BOOT_CONTEXT: BootContext = BootContext(UnsafeCell::new(Context::zero()));

/// PID of the running task.
pub fn current_pid() -> Option<Pid> {
    match CURRENT.load(Ordering::Acquire) {
        0 => None,
        pid => Some(Pid(pid)),
    }
}

/// Put a task on the ready queue. Idempotent for tasks already queued.
pub fn enqueue_ready(pid: Pid) {
    let _irq = IrqGuard::new();
    READY_QUEUE.lock().enqueue(pid);
}

/// Pull a task out of circulation (kill of a READY task).
pub fn remove_ready(pid: Pid) {
    let _irq = IrqGuard::new();
    READY_QUEUE.lock().remove(pid);
}

#[cfg(test)]
pub fn ready_contains(pid: Pid) -> bool {
    READY_QUEUE.lock().contains(pid)
}

/// Make `pid` the running task directly: off the ready queue, state
/// RUNNING, current pointer updated. Used when the boot path (or the
/// test harness) hands the CPU to a specific task instead of letting the
/// queue decide.
pub fn adopt_current(pid: Pid) {
    let _irq = IrqGuard::new();
    READY_QUEUE.lock().remove(pid);
    if let Some(process) = table::get_process(pid) {
        process.set_state(ProcessState::Running);
    }
    CURRENT.store(pid.0, Ordering::Release);
}

/// Schedule an orphaned zombie for collection at the next safe point
/// (after the CPU has left its kernel stack).
pub fn defer_reap(pid: Pid) {
    REAP_PENDING.store(pid.0, Ordering::Release);
}

fn reap_deferred() {
    let pid = REAP_PENDING.swap(0, Ordering::AcqRel);
    if pid != 0 && table::PROCESS_TABLE.state_of(Pid(pid)) == ProcessState::Zombie {
        table::remove_process(Pid(pid));
    }
}

/// Voluntarily give the CPU up: back of the ready queue, then reschedule.
pub fn yield_cpu() {
    {
        let _irq = IrqGuard::new();
        if let Some(process) = process::current_process() {
            if process.get_state() == ProcessState::Running {
                process.set_state(ProcessState::Ready);
                READY_QUEUE.lock().enqueue(process.pid);
            }
        }
    }
    schedule();
}

/// Pick the next READY task and switch to it.
///
/// Returns immediately when the caller is still the best choice. With
/// nothing READY and the caller no longer runnable, the bare-metal
/// kernel halts until an interrupt readies someone; the host shim
/// returns to the caller instead, which is what lets blocking paths be
/// driven step-by-step in tests.
pub fn schedule() {
    let _irq = IrqGuard::new();

    let prev_pid = CURRENT.load(Ordering::Acquire);
    let prev = if prev_pid != 0 {
        table::get_process(Pid(prev_pid))
    } else {
        None
    };

    let next = loop {
        let candidate = {
            // Lock scope kept tight: the queue is not held across the
            // context switch.
            READY_QUEUE.lock().dequeue()
        };
        match candidate {
            Some(pid) if pid.0 == prev_pid => {
                // Round-robin brought us back to the caller.
                if let Some(process) = prev {
                    process.set_state(ProcessState::Running);
                }
                return;
            }
            Some(pid) => match table::get_process(pid) {
                Some(process) if process.get_state() == ProcessState::Ready => break process,
                _ => continue, // stale entry, drop it
            },
            None => {
                let prev_runnable = prev
                    .map(|p| p.get_state() == ProcessState::Running)
                    .unwrap_or(false);
                if prev_runnable {
                    return;
                }
                #[cfg(all(target_arch = "x86", target_os = "none"))]
                {
                    // Nothing to run: wait for an interrupt to ready a
                    // task, then look again.
                    crate::arch::enable_and_halt();
                    continue;
                }
                #[cfg(not(all(target_arch = "x86", target_os = "none")))]
                return;
            }
        }
    };

    next.set_state(ProcessState::Running);
    CURRENT.store(next.pid.0, Ordering::Release);

    // Load the target's address-space root; kernel threads keep whatever
    // is live, the shared high half makes that always correct.
    if let Some(root) = next.memory.lock().root_raw() {
        crate::arch::load_address_space(root);
    }

    let prev_context: *mut Context = match prev {
        Some(process) => process.context.get(),
        None => BOOT_CONTEXT.0.get(),
    };
    let next_context: *const Context = next.context.get();

    // SAFETY: both contexts are live (prev's record is retained even for
    // zombies until reaped; next was just verified), and interrupts are
    // disabled across the switch.
    unsafe {
        context::switch_context(prev_context, next_context);
    }

    // Runs in the context that resumes here; a dead orphan queued for
    // collection is now safely off-CPU.
    reap_deferred();
}

/// Timer interrupt entry: account the tick, preempt round-robin, and on
/// the way back to user mode deliver pending signals.
pub fn timer_interrupt(frame: &mut TrapFrame) {
    timer::on_tick();
    yield_cpu();
    if frame.cs & 3 == 3 {
        process::signal::deliver_pending();
    }
}

#[cfg(test)]
pub fn reset() {
    CURRENT.store(0, Ordering::Release);
    REAP_PENDING.store(0, Ordering::Release);
    READY_QUEUE.lock().clear();
}
