//! Process termination
//!
//! The one teardown path every exit takes, in a fixed order: close file
//! handles, destroy the user address space (returning its frames), mark
//! the record ZOMBIE, then wake the parent's wait-children queue and
//! post SIGCHLD. The kernel stack stays with the record until the parent
//! reaps the zombie, so a dying task can still be switched away from
//! safely. Zombie children of the dying task are collected on the spot;
//! live ones are orphaned and collected when they exit.

use super::pcb::{Pid, Process, ProcessState};
use super::signal::{self, SIGCHLD, SIGKILL};
use super::sync::WaitQueue;
use super::table::{self, PROCESS_TABLE};
use crate::arch::IrqGuard;
use crate::error::{KernelError, KernelResult};
use crate::sched;

/// Terminate the calling task with `status`. On the bare-metal target
/// the final reschedule never returns here; the host shim does return,
/// leaving the record in its zombie state for the caller to inspect.
pub fn exit_current(status: i32) {
    let process = match super::current_process() {
        Some(p) => p,
        None => return,
    };
    log::info!("pid {} ({}) exits with {}", process.pid, process.name, status);
    terminate(process, status);
    sched::schedule();
}

/// Forcibly terminate any task.
///
/// The target is pulled off the ready queue or its wait queue first, so
/// the scheduler can never resurrect it. Killing the calling task
/// returns only after the next scheduler entry (the caller halts
/// afterwards on bare metal).
pub fn kill(pid: Pid) -> KernelResult<()> {
    let process = table::get_process(pid).ok_or(KernelError::ProcessNotFound { pid: pid.0 })?;
    if process.get_state() == ProcessState::Zombie {
        return Ok(());
    }

    if sched::current_pid() == Some(pid) {
        exit_current(signal::termination_status(SIGKILL));
        return Ok(());
    }

    {
        let _irq = IrqGuard::new();
        match process.get_state() {
            ProcessState::Ready => {
                sched::remove_ready(pid);
            }
            ProcessState::Blocked => {
                let queue_id = process.blocked_on_queue();
                if queue_id != 0 {
                    // SAFETY: blocked_on is the address of a live wait
                    // queue; single CPU with interrupts off makes the
                    // read-and-unlink atomic.
                    let queue = unsafe { &*(queue_id as *const WaitQueue) };
                    queue.remove(pid);
                    process.set_blocked_on(0);
                }
            }
            _ => {}
        }
    }

    terminate(process, signal::termination_status(SIGKILL));
    Ok(())
}

/// The common teardown sequence. `process` must not be runnable from any
/// queue when this runs.
pub(super) fn terminate(process: &Process, status: i32) {
    // (a) close file handles
    process.files.lock().close_all();

    // (b) destroy the user address space, freeing every user frame
    process.memory.lock().release();

    process.set_exit_status(status);

    // Children: collect zombies now, orphan the rest.
    for child_pid in PROCESS_TABLE.children_of(process.pid) {
        if let Some(child) = table::get_process(child_pid) {
            if child.get_state() == ProcessState::Zombie {
                table::remove_process(child_pid);
            } else {
                child.set_parent(Pid(0));
            }
        }
    }

    // (c) the record becomes a zombie, retained for the parent
    process.set_state(ProcessState::Zombie);

    // (d) notify the parent
    let parent = process.parent();
    match table::get_process(parent) {
        Some(parent_process) => {
            parent_process.wait_children.wake_all();
            let _ = signal::post(parent, SIGCHLD);
        }
        None => {
            // Orphan: nobody will reap it. The scheduler collects the
            // record once it is safely off this stack.
            sched::defer_reap(process.pid);
        }
    }
}
