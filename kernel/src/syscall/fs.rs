//! File, pipe and namespace syscalls
//!
//! Byte I/O moves through a kernel bounce buffer: the handler does the
//! (possibly blocking) transfer first, then walks the caller's page
//! tables to move bytes across the boundary. Offsets live in the shared
//! open-file entry, so dup'ed and inherited handles advance together.

use alloc::vec;

use super::{current, read_user_bytes, read_user_string, ret, validate_user_range, write_user_bytes};
use crate::arch::context::TrapFrame;
use crate::error::SyscallError;
use crate::fs::file::{self, FileKind, O_CREAT, O_RDONLY, O_WRONLY};
use crate::fs::{self, NodeKind};
use crate::ipc::pipe::Pipe;
use crate::process::Process;

/// Per-call transfer cap; READ/WRITE may return short counts.
const MAX_IO_CHUNK: usize = 64 * 1024;

const SEEK_SET: u32 = 0;
const SEEK_CUR: u32 = 1;
const SEEK_END: u32 = 2;

/// Caller-visible stat record.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawStat {
    pub inode: u32,
    pub size: u32,
    /// 0 = regular file, 1 = directory
    pub kind: u32,
    pub nlink: u32,
}

fn entry_of(process: &Process, fd: usize) -> Result<usize, SyscallError> {
    process
        .files
        .lock()
        .get(fd)
        .map_err(|_| SyscallError::BadFileDescriptor)
}

fn vfs() -> Result<&'static dyn fs::Vfs, SyscallError> {
    fs::vfs().ok_or(SyscallError::NotFound)
}

/// OPEN: path in EBX, flags in ECX. O_CREAT creates a missing file.
pub fn sys_open(frame: &mut TrapFrame) -> isize {
    ret((|| {
        let process = current()?;
        let path = read_user_string(process, frame.ebx)?;
        let flags = frame.ecx;
        let vfs = vfs()?;

        let inode = match vfs.resolve(&path) {
            Some(inode) => inode,
            None if flags & O_CREAT != 0 => vfs.create_file(&path)?,
            None => return Err(SyscallError::NotFound),
        };

        let entry = file::alloc_entry(FileKind::Inode(inode), flags)?;
        match process.files.lock().install(entry) {
            Ok(fd) => Ok(fd),
            Err(err) => {
                file::release_entry(entry);
                Err(err.into())
            }
        }
    })())
}

/// CLOSE: release the handle in EBX.
pub fn sys_close(frame: &mut TrapFrame) -> isize {
    ret((|| {
        let process = current()?;
        let entry = process
            .files
            .lock()
            .take(frame.ebx as usize)
            .map_err(|_| SyscallError::BadFileDescriptor)?;
        file::release_entry(entry);
        Ok(0)
    })())
}

/// READ: fd EBX, buffer ECX, length EDX. Returns bytes transferred; 0 is
/// end-of-file.
pub fn sys_read(frame: &mut TrapFrame) -> isize {
    ret((|| {
        let process = current()?;
        let (fd, buf_ptr, len) = (frame.ebx as usize, frame.ecx, frame.edx);
        validate_user_range(buf_ptr, len)?;
        if len == 0 {
            return Ok(0);
        }
        let entry = entry_of(process, fd)?;
        let (kind, mode, offset) =
            file::with_entry(entry, |e| (e.kind.clone(), e.mode, e.offset))?;

        let want = (len as usize).min(MAX_IO_CHUNK);
        let mut bounce = vec![0u8; want];

        let transferred = match kind {
            FileKind::Inode(inode) => {
                if !file::mode_readable(mode) {
                    return Err(SyscallError::BadFileDescriptor);
                }
                let count = vfs()?.read(inode, offset, &mut bounce)?;
                file::with_entry(entry, |e| e.offset += count as u32)?;
                count
            }
            FileKind::PipeRead(pipe) => pipe.read(&mut bounce)?,
            FileKind::PipeWrite(_) => return Err(SyscallError::BadFileDescriptor),
        };

        write_user_bytes(process, buf_ptr, &bounce[..transferred])?;
        Ok(transferred)
    })())
}

/// WRITE: fd EBX, buffer ECX, length EDX. Returns bytes transferred.
pub fn sys_write(frame: &mut TrapFrame) -> isize {
    ret((|| {
        let process = current()?;
        let (fd, buf_ptr, len) = (frame.ebx as usize, frame.ecx, frame.edx);
        validate_user_range(buf_ptr, len)?;
        if len == 0 {
            return Ok(0);
        }
        let entry = entry_of(process, fd)?;
        let (kind, mode, offset) =
            file::with_entry(entry, |e| (e.kind.clone(), e.mode, e.offset))?;

        let want = (len as usize).min(MAX_IO_CHUNK);
        let mut bounce = vec![0u8; want];
        read_user_bytes(process, buf_ptr, &mut bounce)?;

        let transferred = match kind {
            FileKind::Inode(inode) => {
                if !file::mode_writable(mode) {
                    return Err(SyscallError::BadFileDescriptor);
                }
                let count = vfs()?.write(inode, offset, &bounce)?;
                file::with_entry(entry, |e| e.offset += count as u32)?;
                count
            }
            FileKind::PipeWrite(pipe) => pipe.write(&bounce)?,
            FileKind::PipeRead(_) => return Err(SyscallError::BadFileDescriptor),
        };

        Ok(transferred)
    })())
}

/// SEEK: fd EBX, signed offset ECX, whence EDX. Pipes are not seekable.
/// Returns the new absolute offset.
pub fn sys_seek(frame: &mut TrapFrame) -> isize {
    ret((|| {
        let process = current()?;
        let (fd, offset, whence) = (frame.ebx as usize, frame.ecx as i32, frame.edx);
        let entry = entry_of(process, fd)?;
        let (kind, current_offset) = file::with_entry(entry, |e| (e.kind.clone(), e.offset))?;

        let inode = match kind {
            FileKind::Inode(inode) => inode,
            _ => return Err(SyscallError::InvalidArgument),
        };

        let base = match whence {
            SEEK_SET => 0,
            SEEK_CUR => current_offset as i64,
            SEEK_END => {
                let info = vfs()?.inode(inode).ok_or(SyscallError::NotFound)?;
                info.size as i64
            }
            _ => return Err(SyscallError::InvalidArgument),
        };

        let target = base + offset as i64;
        if target < 0 || target > u32::MAX as i64 {
            return Err(SyscallError::InvalidArgument);
        }
        file::with_entry(entry, |e| e.offset = target as u32)?;
        Ok(target as usize)
    })())
}

/// STAT: path EBX, output struct ECX.
pub fn sys_stat(frame: &mut TrapFrame) -> isize {
    ret((|| {
        let process = current()?;
        let stat_ptr = frame.ecx;
        validate_user_range(stat_ptr, core::mem::size_of::<RawStat>() as u32)?;
        let path = read_user_string(process, frame.ebx)?;

        let vfs = vfs()?;
        let inode = vfs.resolve(&path).ok_or(SyscallError::NotFound)?;
        let info = vfs.inode(inode).ok_or(SyscallError::NotFound)?;

        let raw = RawStat {
            inode: info.inode,
            size: info.size,
            kind: match info.kind {
                NodeKind::File => 0,
                NodeKind::Directory => 1,
            },
            nlink: info.nlink,
        };
        // SAFETY: RawStat is repr(C) plain data; viewing it as bytes is
        // well defined.
        let bytes = unsafe {
            core::slice::from_raw_parts(
                &raw as *const RawStat as *const u8,
                core::mem::size_of::<RawStat>(),
            )
        };
        write_user_bytes(process, stat_ptr, bytes)?;
        Ok(0)
    })())
}

/// DUP: duplicate the handle in EBX; the open-file entry is shared and
/// its refcount bumped.
pub fn sys_dup(frame: &mut TrapFrame) -> isize {
    ret((|| {
        let process = current()?;
        let new_fd = process
            .files
            .lock()
            .dup(frame.ebx as usize)
            .map_err(|_| SyscallError::BadFileDescriptor)?;
        Ok(new_fd)
    })())
}

/// PIPE: EBX points at an `[i32; 2]` that receives the read and write
/// handles of a fresh pipe.
pub fn sys_pipe(frame: &mut TrapFrame) -> isize {
    ret((|| {
        let process = current()?;
        let out_ptr = frame.ebx;
        validate_user_range(out_ptr, 8)?;

        let pipe = Pipe::new();
        let read_entry = file::alloc_entry(FileKind::PipeRead(pipe.clone()), O_RDONLY)?;
        let write_entry = match file::alloc_entry(FileKind::PipeWrite(pipe), O_WRONLY) {
            Ok(entry) => entry,
            Err(err) => {
                file::release_entry(read_entry);
                return Err(err.into());
            }
        };

        let mut files = process.files.lock();
        let read_fd = match files.install(read_entry) {
            Ok(fd) => fd,
            Err(err) => {
                drop(files);
                file::release_entry(read_entry);
                file::release_entry(write_entry);
                return Err(err.into());
            }
        };
        let write_fd = match files.install(write_entry) {
            Ok(fd) => fd,
            Err(err) => {
                files.take(read_fd).ok();
                drop(files);
                file::release_entry(read_entry);
                file::release_entry(write_entry);
                return Err(err.into());
            }
        };
        drop(files);

        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&(read_fd as i32).to_le_bytes());
        out[4..].copy_from_slice(&(write_fd as i32).to_le_bytes());
        if let Err(err) = write_user_bytes(process, out_ptr, &out) {
            let mut files = process.files.lock();
            files.take(read_fd).ok();
            files.take(write_fd).ok();
            drop(files);
            file::release_entry(read_entry);
            file::release_entry(write_entry);
            return Err(err);
        }
        Ok(read_fd)
    })())
}

/// MKDIR: create the directory named in EBX. Returns 0, not the inode;
/// inode numbers stay inside the VFS boundary.
pub fn sys_mkdir(frame: &mut TrapFrame) -> isize {
    ret((|| {
        let process = current()?;
        let path = read_user_string(process, frame.ebx)?;
        vfs()?.mkdir(&path)?;
        Ok(0)
    })())
}

/// UNLINK: remove the name in EBX.
pub fn sys_unlink(frame: &mut TrapFrame) -> isize {
    ret((|| {
        let process = current()?;
        let path = read_user_string(process, frame.ebx)?;
        vfs()?.unlink(&path)?;
        Ok(0)
    })())
}

/// CHDIR: change the working directory to the path in EBX.
pub fn sys_chdir(frame: &mut TrapFrame) -> isize {
    ret((|| {
        let process = current()?;
        let path = read_user_string(process, frame.ebx)?;
        vfs()?.chdir(&path)?;
        Ok(0)
    })())
}

/// GETCWD: write the working directory (NUL terminated) into the buffer
/// at EBX of length ECX. Returns the path length.
pub fn sys_getcwd(frame: &mut TrapFrame) -> isize {
    ret((|| {
        let process = current()?;
        let (buf_ptr, buf_len) = (frame.ebx, frame.ecx);
        validate_user_range(buf_ptr, buf_len)?;

        let mut path = [0u8; super::MAX_USER_STRING];
        let len = vfs()?.cwd_path(&mut path);
        if len >= path.len() || len + 1 > buf_len as usize {
            return Err(SyscallError::InvalidArgument);
        }
        write_user_bytes(process, buf_ptr, &path[..len + 1])?;
        Ok(len)
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched;
    use crate::test_support::{self, MockVfs};

    const SCRATCH: u32 = 0x1500_0000;

    /// World with one ten-byte file opened read-only; returns its fd.
    fn open_fixture() -> u32 {
        test_support::init_kernel();
        let vfs = MockVfs::install();
        vfs.add_file("/data", b"0123456789");

        let task = test_support::spawn_user_task("seek-task");
        test_support::map_scratch_page(task, SCRATCH);
        sched::adopt_current(task.pid);
        test_support::poke_user(task, SCRATCH, b"/data\0");

        let mut frame = TrapFrame {
            eax: crate::syscall::SYS_OPEN as u32,
            ebx: SCRATCH,
            ecx: file::O_RDONLY,
            ..TrapFrame::default()
        };
        let fd = sys_open(&mut frame);
        assert!(fd >= 0);
        fd as u32
    }

    fn seek(fd: u32, offset: i32, whence: u32) -> isize {
        let mut frame = TrapFrame {
            eax: crate::syscall::SYS_SEEK as u32,
            ebx: fd,
            ecx: offset as u32,
            edx: whence,
            ..TrapFrame::default()
        };
        sys_seek(&mut frame)
    }

    #[test]
    fn test_seek_whence_variants() {
        let _g = test_support::lock();
        let fd = open_fixture();

        assert_eq!(seek(fd, 4, SEEK_SET), 4);
        assert_eq!(seek(fd, 3, SEEK_CUR), 7);
        assert_eq!(seek(fd, -5, SEEK_CUR), 2);
        assert_eq!(seek(fd, 0, SEEK_END), 10);
        assert_eq!(seek(fd, -4, SEEK_END), 6);

        // The repositioned offset feeds the next read.
        let task = crate::process::current_process().unwrap();
        let mut frame = TrapFrame {
            eax: crate::syscall::SYS_READ as u32,
            ebx: fd,
            ecx: SCRATCH + 0x100,
            edx: 4,
            ..TrapFrame::default()
        };
        assert_eq!(sys_read(&mut frame), 4);
        assert_eq!(test_support::peek_user(task, SCRATCH + 0x100, 4), b"6789");
    }

    #[test]
    fn test_seek_rejects_negative_target() {
        let _g = test_support::lock();
        let fd = open_fixture();

        assert_eq!(seek(fd, -1, SEEK_SET), -1);
        // Offset is 0, so any move back underflows.
        assert_eq!(seek(fd, -1, SEEK_CUR), -1);
        // Size is 10; eleven back from the end underflows too.
        assert_eq!(seek(fd, -11, SEEK_END), -1);
        // A rejected seek leaves the offset alone.
        assert_eq!(seek(fd, 0, SEEK_CUR), 0);
    }

    #[test]
    fn test_seek_rejects_offset_overflow() {
        let _g = test_support::lock();
        let fd = open_fixture();

        assert_eq!(seek(fd, i32::MAX, SEEK_SET), i32::MAX as isize);
        assert_eq!(seek(fd, i32::MAX, SEEK_CUR), u32::MAX as isize - 1);
        // One more step crosses the 32-bit offset range and is refused
        // without touching the stored offset.
        assert_eq!(seek(fd, 2, SEEK_CUR), -1);
        assert_eq!(seek(fd, 0, SEEK_CUR), u32::MAX as isize - 1);
    }

    #[test]
    fn test_seek_invalid_whence_rejected() {
        let _g = test_support::lock();
        let fd = open_fixture();
        assert_eq!(seek(fd, 0, 3), -1);
    }

    #[test]
    fn test_seek_on_pipe_rejected() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let task = test_support::spawn_user_task("pipe-seek");
        test_support::map_scratch_page(task, SCRATCH);
        sched::adopt_current(task.pid);

        let mut frame = TrapFrame {
            eax: crate::syscall::SYS_PIPE as u32,
            ebx: SCRATCH,
            ..TrapFrame::default()
        };
        let rfd = sys_pipe(&mut frame);
        assert!(rfd >= 0);
        assert_eq!(seek(rfd as u32, 0, SEEK_SET), -1);
    }
}
