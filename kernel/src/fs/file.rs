//! Open-file table and per-process file handles
//!
//! A file handle is a small integer indexing the per-process
//! [`FdTable`]; each used entry points into the process-wide open-file
//! table, whose entries carry the reference count, the shared offset,
//! the open mode, and either an inode or a pipe endpoint. `dup` and
//! spawn-time inheritance bump the entry refcount; the entry (and a pipe
//! endpoint with it) goes away when the last handle closes.

use alloc::sync::Arc;
use spin::Mutex;

use super::InodeId;
use crate::error::{KernelError, KernelResult};
use crate::ipc::pipe::Pipe;

/// Per-process file handle capacity.
pub const MAX_FDS: usize = 16;

/// Process-wide open-file table capacity.
pub const MAX_OPEN_FILES: usize = 64;

// Open mode bits (low two bits are the access mode)
pub const O_RDONLY: u32 = 0x0;
pub const O_WRONLY: u32 = 0x1;
pub const O_RDWR: u32 = 0x2;
pub const O_CREAT: u32 = 0x40;

const O_ACCMODE: u32 = 0x3;

pub fn mode_readable(mode: u32) -> bool {
    mode & O_ACCMODE != O_WRONLY
}

pub fn mode_writable(mode: u32) -> bool {
    mode & O_ACCMODE != O_RDONLY
}

/// What an open-file entry refers to.
#[derive(Clone)]
pub enum FileKind {
    Inode(InodeId),
    PipeRead(Arc<Pipe>),
    PipeWrite(Arc<Pipe>),
}

/// One process-wide open-file entry, shared by dup'ed handles.
pub struct OpenFile {
    pub refcount: u32,
    pub offset: u32,
    pub mode: u32,
    pub kind: FileKind,
}

struct OpenFileTable {
    entries: [Option<OpenFile>; MAX_OPEN_FILES],
}

static OPEN_FILES: Mutex<OpenFileTable> = Mutex::new(OpenFileTable {
    entries: [const { None }; MAX_OPEN_FILES],
});

/// Allocate an open-file entry with refcount 1.
pub fn alloc_entry(kind: FileKind, mode: u32) -> KernelResult<usize> {
    let mut table = OPEN_FILES.lock();
    for (index, slot) in table.entries.iter_mut().enumerate() {
        if slot.is_none() {
            *slot = Some(OpenFile {
                refcount: 1,
                offset: 0,
                mode,
                kind,
            });
            return Ok(index);
        }
    }
    Err(KernelError::ResourceExhausted {
        resource: "open-file table",
    })
}

/// Add one reference (dup, handle inheritance).
pub fn retain_entry(index: usize) -> KernelResult<()> {
    let mut table = OPEN_FILES.lock();
    match table.entries.get_mut(index).and_then(|e| e.as_mut()) {
        Some(entry) => {
            entry.refcount += 1;
            Ok(())
        }
        None => Err(KernelError::NotFound {
            resource: "open file",
        }),
    }
}

/// Drop one reference; the entry is released when it hits zero. A pipe
/// endpoint going away notifies the peer side.
pub fn release_entry(index: usize) {
    let closed = {
        let mut table = OPEN_FILES.lock();
        let now_unreferenced = match table.entries.get_mut(index).and_then(|e| e.as_mut()) {
            Some(entry) => {
                entry.refcount -= 1;
                entry.refcount == 0
            }
            None => false,
        };
        if now_unreferenced {
            table.entries[index].take()
        } else {
            None
        }
    };
    // Endpoint teardown happens outside the table lock: it may wake
    // blocked peers.
    if let Some(entry) = closed {
        match entry.kind {
            FileKind::PipeRead(pipe) => pipe.drop_reader(),
            FileKind::PipeWrite(pipe) => pipe.drop_writer(),
            FileKind::Inode(_) => {}
        }
    }
}

/// Run `f` on a live entry.
pub fn with_entry<R>(index: usize, f: impl FnOnce(&mut OpenFile) -> R) -> KernelResult<R> {
    let mut table = OPEN_FILES.lock();
    match table.entries.get_mut(index).and_then(|e| e.as_mut()) {
        Some(entry) => Ok(f(entry)),
        None => Err(KernelError::NotFound {
            resource: "open file",
        }),
    }
}

/// Clone of the entry's kind (cheap: inode number or Arc bump).
pub fn kind_of(index: usize) -> KernelResult<FileKind> {
    with_entry(index, |entry| entry.kind.clone())
}

/// Current refcount; test and diagnostic use.
pub fn refcount_of(index: usize) -> KernelResult<u32> {
    with_entry(index, |entry| entry.refcount)
}

#[cfg(test)]
pub(crate) fn reset_open_files() {
    let mut table = OPEN_FILES.lock();
    for slot in table.entries.iter_mut() {
        *slot = None;
    }
}

// ---------------------------------------------------------------------------
// Per-process handle table
// ---------------------------------------------------------------------------

/// Fixed vector of handles; −1 marks a free slot, anything else indexes
/// the open-file table.
pub struct FdTable {
    slots: [i32; MAX_FDS],
}

impl FdTable {
    pub const fn new() -> Self {
        Self {
            slots: [-1; MAX_FDS],
        }
    }

    /// Bind the lowest free handle to an open-file entry.
    pub fn install(&mut self, entry: usize) -> KernelResult<usize> {
        for (fd, slot) in self.slots.iter_mut().enumerate() {
            if *slot < 0 {
                *slot = entry as i32;
                return Ok(fd);
            }
        }
        Err(KernelError::ResourceExhausted {
            resource: "file handles",
        })
    }

    /// Open-file index behind a handle.
    pub fn get(&self, fd: usize) -> KernelResult<usize> {
        match self.slots.get(fd) {
            Some(&entry) if entry >= 0 => Ok(entry as usize),
            _ => Err(KernelError::NotFound {
                resource: "file handle",
            }),
        }
    }

    /// Free a handle, returning the entry index it held.
    pub fn take(&mut self, fd: usize) -> KernelResult<usize> {
        let entry = self.get(fd)?;
        self.slots[fd] = -1;
        Ok(entry)
    }

    /// Duplicate a handle into the lowest free slot, sharing the entry.
    pub fn dup(&mut self, fd: usize) -> KernelResult<usize> {
        let entry = self.get(fd)?;
        retain_entry(entry)?;
        match self.install(entry) {
            Ok(new_fd) => Ok(new_fd),
            Err(err) => {
                release_entry(entry);
                Err(err)
            }
        }
    }

    /// Copy for spawn-time inheritance: same handle numbers, shared
    /// entries, refcounts bumped.
    pub fn inherit(&self) -> FdTable {
        let mut copy = FdTable::new();
        for (fd, &slot) in self.slots.iter().enumerate() {
            if slot >= 0 && retain_entry(slot as usize).is_ok() {
                copy.slots[fd] = slot;
            }
        }
        copy
    }

    /// Release every handle (process exit).
    pub fn close_all(&mut self) {
        for slot in self.slots.iter_mut() {
            if *slot >= 0 {
                release_entry(*slot as usize);
                *slot = -1;
            }
        }
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|&&s| s >= 0).count()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}
