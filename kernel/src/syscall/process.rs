//! Process-management syscalls

use super::{current, read_user_string, ret, validate_user_range, write_user_bytes};
use crate::arch::context::TrapFrame;
use crate::error::SyscallError;
use crate::process::{exit, signal, wait, Pid};
use crate::{elf, sched, timer};

/// EXIT: terminate the caller with the status in EBX. Never returns to
/// user mode; the scheduler moves on.
pub fn sys_exit(frame: &mut TrapFrame) -> isize {
    exit::exit_current(frame.ebx as i32);
    0
}

/// GETPID: the caller's PID.
pub fn sys_getpid(frame: &mut TrapFrame) -> isize {
    let _ = frame;
    ret(current().map(|p| p.pid.0 as usize))
}

/// SLEEP: halt-loop until EBX ticks have elapsed.
pub fn sys_sleep(frame: &mut TrapFrame) -> isize {
    timer::sleep_ticks(frame.ebx as u64);
    0
}

/// SPAWN: load the ELF image named by the path in EBX; the child's
/// parent is the caller. Returns the new PID.
pub fn sys_spawn(frame: &mut TrapFrame) -> isize {
    ret((|| {
        let process = current()?;
        let path = read_user_string(process, frame.ebx)?;
        let pid = elf::spawn(&path, process.pid)?;
        Ok(pid.0 as usize)
    })())
}

/// WAITPID: reap a zombie child. EBX is the PID to wait for (−1 for any
/// child); ECX, when non-null, receives the child's exit status.
pub fn sys_waitpid(frame: &mut TrapFrame) -> isize {
    ret((|| {
        let process = current()?;
        let status_ptr = frame.ecx;
        if status_ptr != 0 {
            validate_user_range(status_ptr, 4)?;
        }

        let target = match frame.ebx as i32 {
            -1 => None,
            pid if pid > 0 => Some(Pid(pid as u32)),
            _ => return Err(SyscallError::InvalidArgument),
        };

        let (child, status) = wait::wait_for_child(target)?;
        if status_ptr != 0 {
            write_user_bytes(process, status_ptr, &status.to_le_bytes())?;
        }
        Ok(child.0 as usize)
    })())
}

/// KILL: post signal ECX to process EBX.
pub fn sys_kill(frame: &mut TrapFrame) -> isize {
    ret((|| {
        signal::post(Pid(frame.ebx), frame.ecx)?;
        Ok(0)
    })())
}

/// YIELD: give the CPU up voluntarily.
pub fn sys_yield(frame: &mut TrapFrame) -> isize {
    let _ = frame;
    sched::yield_cpu();
    0
}
