//! Waiting for children
//!
//! `waitpid` semantics: scan the table for a zombie child (any child, or
//! one specific PID), copy its exit status out, and release its slot. No
//! zombie but live candidates: block on the caller's wait-children
//! queue, which every exiting child wakes. No candidates at all: fail
//! immediately. A terminating signal arriving while blocked unwinds the
//! wait with an interruption error so the dispatch-exit checkpoint can
//! act on it.

use super::pcb::{Pid, ProcessState};
use super::signal;
use super::table::{self, PROCESS_TABLE};
use crate::error::{KernelError, KernelResult};

/// Reap a zombie child.
///
/// `target` of `None` waits for any child. Returns the reaped child's
/// PID and exit status; the child's slot is released before returning.
pub fn wait_for_child(target: Option<Pid>) -> KernelResult<(Pid, i32)> {
    let current = super::current_process().ok_or(KernelError::NotInitialized {
        subsystem: "current process",
    })?;

    loop {
        let mut matching_child = false;
        let mut reaped = None;

        for child_pid in PROCESS_TABLE.children_of(current.pid) {
            if let Some(wanted) = target {
                if child_pid != wanted {
                    continue;
                }
            }
            if let Some(child) = table::get_process(child_pid) {
                matching_child = true;
                if child.get_state() == ProcessState::Zombie {
                    reaped = Some((child_pid, child.exit_status()));
                    break;
                }
            }
        }

        if let Some((pid, status)) = reaped {
            // Zero the PID: the slot (and the kernel stack held by the
            // record) is released here.
            table::remove_process(pid);
            return Ok((pid, status));
        }
        if !matching_child {
            return Err(KernelError::NoChildren);
        }

        current.wait_children.sleep_on();

        // Woken either by a child's exit or by a terminating signal.
        // Ignorable pending bits (SIGCHLD itself) do not interrupt.
        if signal::has_actionable_pending(current) {
            return Err(KernelError::Interrupted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::exit;
    use crate::test_support;

    #[test]
    fn test_wait_with_no_children_fails() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let lonely = test_support::spawn_kernel_record("lonely");
        crate::sched::adopt_current(lonely.pid);
        assert_eq!(wait_for_child(None), Err(KernelError::NoChildren));
    }

    #[test]
    fn test_wait_reaps_ready_zombie_without_blocking() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let parent = test_support::spawn_kernel_record("w-parent");
        let child = test_support::spawn_user_record("w-child", parent.pid);
        let child_pid = child.pid;

        crate::sched::adopt_current(child.pid);
        exit::exit_current(42);

        crate::sched::adopt_current(parent.pid);
        let (pid, status) = wait_for_child(None).unwrap();
        assert_eq!(pid, child_pid);
        assert_eq!(status, 42);
        // The slot is freed; waiting again finds nothing.
        assert!(table::get_process(child_pid).is_none());
        assert_eq!(wait_for_child(None), Err(KernelError::NoChildren));
    }

    #[test]
    fn test_wait_for_specific_pid() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let parent = test_support::spawn_kernel_record("s-parent");
        let first = test_support::spawn_user_record("s-first", parent.pid);
        let second = test_support::spawn_user_record("s-second", parent.pid);

        crate::sched::adopt_current(first.pid);
        exit::exit_current(1);
        crate::sched::adopt_current(second.pid);
        exit::exit_current(2);

        crate::sched::adopt_current(parent.pid);
        let (pid, status) = wait_for_child(Some(second.pid)).unwrap();
        assert_eq!(pid, second.pid);
        assert_eq!(status, 2);

        // The other zombie is still there for an any-child wait.
        let (pid, status) = wait_for_child(None).unwrap();
        assert_eq!(pid, first.pid);
        assert_eq!(status, 1);
    }

    #[test]
    fn test_wait_for_missing_pid_fails() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let parent = test_support::spawn_kernel_record("m-parent");
        let _child = test_support::spawn_user_record("m-child", parent.pid);

        crate::sched::adopt_current(parent.pid);
        assert_eq!(
            wait_for_child(Some(Pid(4242))),
            Err(KernelError::NoChildren)
        );
    }
}
