//! VirtIO-GPU collaborator boundary
//!
//! The 3D transport lives outside this core; the three GPU syscalls are
//! thin routes into a registered [`GpuTransport`]. Context ids are
//! opaque and returned to user space as-is.

use spin::Mutex;

use crate::error::KernelResult;

/// Opaque rendering-context id.
pub type CtxId = u32;

/// GPU transport contract.
pub trait GpuTransport: Send + Sync {
    fn create_context(&self) -> Option<CtxId>;

    fn submit(&self, ctx: CtxId, commands: &[u8]) -> KernelResult<()>;

    fn destroy_context(&self, ctx: CtxId);
}

static GPU: Mutex<Option<&'static dyn GpuTransport>> = Mutex::new(None);

pub fn register_gpu(transport: &'static dyn GpuTransport) {
    *GPU.lock() = Some(transport);
}

pub fn gpu() -> Option<&'static dyn GpuTransport> {
    *GPU.lock()
}

#[cfg(test)]
pub(crate) fn unregister_gpu() {
    *GPU.lock() = None;
}
