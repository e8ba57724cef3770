//! Round-robin scheduler
//!
//! A single FIFO ready queue of PIDs and a current-task pointer, both
//! mutated only inside interrupt-disabled critical sections. Scheduling
//! decisions happen at three points only: the timer tick, a voluntary
//! sleep, and the return path of a syscall whose caller stopped running.

pub mod queue;
pub mod scheduler;

pub use scheduler::{
    adopt_current, current_pid, defer_reap, enqueue_ready, remove_ready, schedule, timer_interrupt,
    yield_cpu,
};

#[cfg(test)]
pub use scheduler::ready_contains;
