//! Signal bitmasks and delivery
//!
//! A fixed set of signal numbers (1..=31), one pending bit per signal in
//! each process record, and a default-action table. Delivery happens at
//! exactly two checkpoints: the tail of every syscall dispatch, and the
//! timer path when it returns to user mode. Posting a signal to a task
//! blocked on an interruptible wait queue pulls it off the queue so its
//! syscall can unwind to the checkpoint.

use super::pcb::{Pid, ProcessState};
use super::sync::WaitQueue;
use super::table;
use crate::arch::IrqGuard;
use crate::error::{KernelError, KernelResult};

pub const SIGHUP: u32 = 1;
pub const SIGINT: u32 = 2;
pub const SIGQUIT: u32 = 3;
pub const SIGILL: u32 = 4;
pub const SIGTRAP: u32 = 5;
pub const SIGABRT: u32 = 6;
pub const SIGBUS: u32 = 7;
pub const SIGFPE: u32 = 8;
pub const SIGKILL: u32 = 9;
pub const SIGUSR1: u32 = 10;
pub const SIGSEGV: u32 = 11;
pub const SIGUSR2: u32 = 12;
pub const SIGPIPE: u32 = 13;
pub const SIGALRM: u32 = 14;
pub const SIGTERM: u32 = 15;
pub const SIGCHLD: u32 = 17;
pub const SIGCONT: u32 = 18;
pub const SIGSTOP: u32 = 19;

/// Highest valid signal number.
pub const SIG_MAX: u32 = 31;

/// What the kernel does with a delivered signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Terminate,
    Ignore,
}

/// Default action for a signal number.
pub fn default_action(signum: u32) -> SignalAction {
    match signum {
        SIGCHLD | SIGCONT => SignalAction::Ignore,
        _ => SignalAction::Terminate,
    }
}

/// Exit status reported for a task terminated by `signum`.
pub fn termination_status(signum: u32) -> i32 {
    128 + signum as i32
}

/// Whether the task has a pending signal that would actually do
/// something on delivery. Ignorable bits (SIGCHLD, SIGCONT) do not
/// interrupt blocked syscalls.
pub fn has_actionable_pending(process: &super::pcb::Process) -> bool {
    let mask = process.pending_signals();
    if mask == 0 {
        return false;
    }
    (1..=SIG_MAX).any(|signum| {
        mask & (1 << signum) != 0 && default_action(signum) == SignalAction::Terminate
    })
}

/// Post a signal: OR the bit into the target's pending mask and, if the
/// target is blocked on an interruptible queue, wake it so the pending
/// bit is observed at its syscall-return checkpoint.
pub fn post(pid: Pid, signum: u32) -> KernelResult<()> {
    if signum == 0 || signum > SIG_MAX {
        return Err(KernelError::InvalidArgument { what: "signal" });
    }
    let process = table::get_process(pid).ok_or(KernelError::ProcessNotFound { pid: pid.0 })?;
    if process.get_state() == ProcessState::Zombie {
        return Err(KernelError::ProcessNotFound { pid: pid.0 });
    }

    process.set_pending_signal(signum);

    let _irq = IrqGuard::new();
    if process.get_state() == ProcessState::Blocked {
        let queue_id = process.blocked_on_queue();
        if queue_id != 0 {
            // SAFETY: blocked_on holds the address of a live wait queue;
            // queues outlive their waiters (statics, process records in
            // the arena, or Arc-held pipe endpoints pinned by the
            // blocked task's own handle), and the interrupt guard keeps
            // this read/unlink atomic on the single CPU.
            let queue = unsafe { &*(queue_id as *const WaitQueue) };
            if queue.interruptible() {
                queue.remove(process.pid);
                process.set_blocked_on(0);
                process.set_state(ProcessState::Ready);
                crate::sched::enqueue_ready(process.pid);
            }
        }
    }
    Ok(())
}

/// Deliver pending signals to the current task, lowest number first.
/// Runs at the dispatch-exit checkpoint; a Terminate action does not
/// return on the bare-metal target.
pub fn deliver_pending() {
    loop {
        let process = match super::current_process() {
            Some(p) => p,
            None => return,
        };
        if process.get_state() != ProcessState::Running {
            return;
        }
        let signum = match process.next_pending_signal() {
            Some(s) => s,
            None => return,
        };
        process.clear_pending_signal(signum);

        match default_action(signum) {
            SignalAction::Ignore => continue,
            SignalAction::Terminate => {
                log::info!(
                    "signal {} terminates pid {} ({})",
                    signum,
                    process.pid,
                    process.name
                );
                super::exit::exit_current(termination_status(signum));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn test_default_actions() {
        assert_eq!(default_action(SIGTERM), SignalAction::Terminate);
        assert_eq!(default_action(SIGKILL), SignalAction::Terminate);
        assert_eq!(default_action(SIGPIPE), SignalAction::Terminate);
        assert_eq!(default_action(SIGCHLD), SignalAction::Ignore);
        assert_eq!(default_action(SIGCONT), SignalAction::Ignore);
    }

    #[test]
    fn test_post_validates_number_and_target() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let p = test_support::spawn_kernel_record("sig");
        assert!(post(p.pid, 0).is_err());
        assert!(post(p.pid, SIG_MAX + 1).is_err());
        assert!(post(Pid(9999), SIGTERM).is_err());
        assert!(post(p.pid, SIGTERM).is_ok());
        assert_eq!(p.next_pending_signal(), Some(SIGTERM));
    }

    #[test]
    fn test_post_wakes_interruptible_waiter() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let p = test_support::spawn_kernel_record("sig-wake");
        let queue = WaitQueue::new(true);
        crate::sched::adopt_current(p.pid);
        queue.sleep_on();
        assert_eq!(p.get_state(), ProcessState::Blocked);

        post(p.pid, SIGTERM).unwrap();
        assert_eq!(p.get_state(), ProcessState::Ready);
        assert!(queue.is_empty());
        assert_eq!(p.blocked_on_queue(), 0);
    }

    #[test]
    fn test_post_leaves_uninterruptible_waiter_alone() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let p = test_support::spawn_kernel_record("sig-hold");
        let queue = WaitQueue::new(false);
        crate::sched::adopt_current(p.pid);
        queue.sleep_on();

        post(p.pid, SIGTERM).unwrap();
        // Still parked: the signal waits for the queue to release it.
        assert_eq!(p.get_state(), ProcessState::Blocked);
        assert!(queue.contains(p.pid));
        assert_eq!(p.next_pending_signal(), Some(SIGTERM));
    }

    #[test]
    fn test_ignored_signals_are_consumed() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let p = test_support::spawn_kernel_record("sig-ign");
        crate::sched::adopt_current(p.pid);
        p.set_pending_signal(SIGCHLD);
        deliver_pending();
        assert_eq!(p.pending_signals(), 0);
        assert!(p.is_alive());
    }
}
