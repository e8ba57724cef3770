//! Tick counter
//!
//! The PIT fires at [`TICK_HZ`] and the interrupt path calls [`on_tick`]
//! before entering the scheduler. Sleeping is tick-resolution polling:
//! the caller halts until the target tick arrives, waking on every timer
//! interrupt in between. On the host target `halt` itself advances the
//! counter, so the same loop terminates in tests.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch;

/// Timer interrupt rate.
pub const TICK_HZ: u32 = 100;

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Called from the timer interrupt path, once per tick.
pub fn on_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

/// Ticks since boot.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Busy-halt until `n` ticks have elapsed.
pub fn sleep_ticks(n: u64) {
    let target = ticks() + n;
    while ticks() < target {
        arch::halt();
    }
}

#[cfg(test)]
pub(crate) fn reset() {
    TICKS.store(0, Ordering::Relaxed);
}
