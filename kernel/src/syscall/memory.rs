//! Memory-management syscalls
//!
//! The three calls that shape a process's low half: `brk` for the heap
//! segment, anonymous-only `mmap`/`munmap` for everything else. All of
//! the placement, rollback, and bookkeeping logic lives with the process
//! memory record; this layer extracts arguments and enforces the ABI
//! conventions (brk always answers with the current break, mmap answers
//! −1 like every other failing call).

use super::{current, ret};
use crate::arch::context::TrapFrame;

pub use crate::process::memory::{MAP_ANONYMOUS, MAP_FIXED, MAP_PRIVATE, PROT_READ, PROT_WRITE};

/// BRK: EBX of 0 queries the break; anything else asks to move it.
/// Always returns the (possibly unchanged) current break; shrinking is
/// rejected and growth past the stack region is refused, both visible
/// as an unchanged return value.
pub fn sys_brk(frame: &mut TrapFrame) -> isize {
    match current() {
        Ok(process) => {
            let brk = process.memory.lock().brk_set(frame.ebx);
            brk as isize
        }
        Err(_) => -1,
    }
}

/// MMAP: EBX address (0 = kernel chooses; MAP_FIXED makes it binding),
/// ECX length, EDX protection, ESI flags. Anonymous only. Returns the
/// mapped base address.
pub fn sys_mmap(frame: &mut TrapFrame) -> isize {
    ret((|| {
        let process = current()?;
        let base = process
            .memory
            .lock()
            .mmap(frame.ebx, frame.ecx, frame.edx, frame.esi)?;
        Ok(base as usize)
    })())
}

/// MUNMAP: EBX base, ECX length; must match a recorded mapping exactly.
pub fn sys_munmap(frame: &mut TrapFrame) -> isize {
    ret((|| {
        let process = current()?;
        process.memory.lock().munmap(frame.ebx, frame.ecx)?;
        Ok(0)
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::{frame_allocator, PAGE_SIZE, USER_MMAP_BASE};
    use crate::test_support;

    fn frame_for(nr: usize, ebx: u32, ecx: u32, edx: u32, esi: u32) -> TrapFrame {
        TrapFrame {
            eax: nr as u32,
            ebx,
            ecx,
            edx,
            esi,
            ..TrapFrame::default()
        }
    }

    #[test]
    fn test_mmap_munmap_through_dispatch() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let task = test_support::spawn_user_task("mm-task");
        crate::sched::adopt_current(task.pid);

        let mut frame = frame_for(
            crate::syscall::SYS_MMAP,
            0,
            2 * PAGE_SIZE as u32,
            PROT_READ | PROT_WRITE,
            MAP_ANONYMOUS,
        );
        crate::syscall::dispatch(&mut frame);
        assert_eq!(frame.eax, USER_MMAP_BASE);

        let before = frame_allocator::free_count();
        let mut frame = frame_for(
            crate::syscall::SYS_MUNMAP,
            USER_MMAP_BASE,
            2 * PAGE_SIZE as u32,
            0,
            0,
        );
        crate::syscall::dispatch(&mut frame);
        assert_eq!(frame.eax, 0);
        assert_eq!(frame_allocator::free_count(), before + 2);
    }

    #[test]
    fn test_mmap_zero_length_fails_through_dispatch() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let task = test_support::spawn_user_task("mm-zero");
        crate::sched::adopt_current(task.pid);

        let mut frame = frame_for(crate::syscall::SYS_MMAP, 0, 0, PROT_READ, MAP_ANONYMOUS);
        crate::syscall::dispatch(&mut frame);
        assert_eq!(frame.eax as i32, -1);
    }

    #[test]
    fn test_brk_abi_reports_current_break() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let task = test_support::spawn_user_task("brk-task");
        crate::sched::adopt_current(task.pid);
        let initial = task.memory.lock().brk;

        // Query
        let mut frame = frame_for(crate::syscall::SYS_BRK, 0, 0, 0, 0);
        crate::syscall::dispatch(&mut frame);
        assert_eq!(frame.eax, initial);

        // Grow by one page
        let mut frame = frame_for(crate::syscall::SYS_BRK, initial + PAGE_SIZE as u32, 0, 0, 0);
        crate::syscall::dispatch(&mut frame);
        assert_eq!(frame.eax, initial + PAGE_SIZE as u32);

        // Shrink attempt answers with the unchanged break
        let mut frame = frame_for(crate::syscall::SYS_BRK, initial, 0, 0, 0);
        crate::syscall::dispatch(&mut frame);
        assert_eq!(frame.eax, initial + PAGE_SIZE as u32);
    }

    #[test]
    fn test_kernel_thread_gets_no_mappings() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let thread = test_support::spawn_kernel_record("no-mm");
        crate::sched::adopt_current(thread.pid);

        let mut frame = frame_for(
            crate::syscall::SYS_MMAP,
            0,
            PAGE_SIZE as u32,
            PROT_READ,
            MAP_ANONYMOUS,
        );
        crate::syscall::dispatch(&mut frame);
        assert_eq!(frame.eax as i32, -1);

        let mut frame = frame_for(crate::syscall::SYS_BRK, 0x1000, 0, 0, 0);
        crate::syscall::dispatch(&mut frame);
        assert_eq!(frame.eax, 0); // kernel thread: break stays zero
    }
}
