//! VFS collaborator boundary
//!
//! The on-disk filesystem lives outside this core. The kernel routes
//! path and inode operations through a registered [`Vfs`] trait object
//! and treats inode numbers as opaque. What *is* core-owned sits in
//! [`file`]: the process-wide open-file table and the per-process file
//! handle tables the syscalls consume.

pub mod file;

use spin::Mutex;

use crate::error::KernelResult;

/// Opaque inode number handed out by the VFS.
pub type InodeId = u32;

/// Node type reported by `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

/// Inode metadata snapshot.
#[derive(Debug, Clone, Copy)]
pub struct InodeInfo {
    pub inode: InodeId,
    pub size: u32,
    pub kind: NodeKind,
    pub nlink: u32,
}

/// Filesystem collaborator contract.
pub trait Vfs: Send + Sync {
    /// Resolve a path to an inode number.
    fn resolve(&self, path: &str) -> Option<InodeId>;

    /// Metadata for an inode.
    fn inode(&self, id: InodeId) -> Option<InodeInfo>;

    /// Create a regular file and return its inode.
    fn create_file(&self, path: &str) -> KernelResult<InodeId>;

    fn mkdir(&self, path: &str) -> KernelResult<()>;

    fn unlink(&self, path: &str) -> KernelResult<()>;

    fn chdir(&self, path: &str) -> KernelResult<()>;

    /// Write the current working directory path into `buf`; returns the
    /// number of path bytes (no terminator).
    fn cwd_path(&self, buf: &mut [u8]) -> usize;

    fn read(&self, id: InodeId, offset: u32, buf: &mut [u8]) -> KernelResult<usize>;

    fn write(&self, id: InodeId, offset: u32, buf: &[u8]) -> KernelResult<usize>;
}

static VFS: Mutex<Option<&'static dyn Vfs>> = Mutex::new(None);

/// Register the filesystem collaborator. Later registrations replace
/// earlier ones (the test suite swaps mocks in and out).
pub fn register_vfs(vfs: &'static dyn Vfs) {
    *VFS.lock() = Some(vfs);
}

/// The registered filesystem, if any.
pub fn vfs() -> Option<&'static dyn Vfs> {
    *VFS.lock()
}

#[cfg(test)]
pub(crate) fn unregister_vfs() {
    *VFS.lock() = None;
}
