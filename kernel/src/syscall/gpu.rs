//! GPU context syscalls: thin routing into the VirtIO-GPU collaborator

use alloc::vec;

use super::{current, read_user_bytes, ret, validate_user_range};
use crate::arch::context::TrapFrame;
use crate::error::SyscallError;
use crate::gpu;

/// Upper bound on one command-batch submission.
const MAX_SUBMIT: usize = 64 * 1024;

/// GPU_CREATE_CTX: allocate a rendering context; returns its id.
pub fn sys_gpu_create_ctx(frame: &mut TrapFrame) -> isize {
    let _ = frame;
    ret((|| {
        let transport = gpu::gpu().ok_or(SyscallError::NotFound)?;
        let ctx = transport
            .create_context()
            .ok_or(SyscallError::OutOfMemory)?;
        Ok(ctx as usize)
    })())
}

/// GPU_SUBMIT: context EBX, command buffer ECX, length EDX.
pub fn sys_gpu_submit(frame: &mut TrapFrame) -> isize {
    ret((|| {
        let process = current()?;
        let (ctx, buf_ptr, len) = (frame.ebx, frame.ecx, frame.edx);
        validate_user_range(buf_ptr, len)?;
        if len as usize > MAX_SUBMIT {
            return Err(SyscallError::InvalidArgument);
        }

        let transport = gpu::gpu().ok_or(SyscallError::NotFound)?;
        let mut commands = vec![0u8; len as usize];
        read_user_bytes(process, buf_ptr, &mut commands)?;
        transport.submit(ctx, &commands)?;
        Ok(0)
    })())
}

/// GPU_DESTROY_CTX: tear context EBX down.
pub fn sys_gpu_destroy_ctx(frame: &mut TrapFrame) -> isize {
    ret((|| {
        let transport = gpu::gpu().ok_or(SyscallError::NotFound)?;
        transport.destroy_context(frame.ebx);
        Ok(0)
    })())
}
