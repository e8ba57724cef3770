//! Shared plumbing for the host-target test suite
//!
//! Kernel state is process-global, so stateful tests serialize on one
//! lock and rebuild the world from scratch: simulated physical memory,
//! kernel root with its preallocated high half, empty process table,
//! idle task adopted as current. Mock collaborators for the VFS, the
//! loader, the UDP stack and the GPU transport live here too.

use std::collections::BTreeMap;
use std::string::String;
use std::sync::{Mutex as StdMutex, MutexGuard};
use std::vec::Vec;

use crate::error::{FsError, KernelResult};
use crate::fs::{InodeId, InodeInfo, NodeKind, Vfs};
use crate::mm::frame_allocator::FrameNumber;
use crate::mm::{self, AddressSpace, PteFlags, VirtualAddress, USER_STACK_TOP};
use crate::process::{creation, memory::ProcessMemory, table, Pid, Process};
use crate::{arch, elf, gpu, net};

static LOCK: StdMutex<()> = StdMutex::new(());

/// Serialize stateful tests. A panicking test must not wedge the rest of
/// the suite, so poisoning is ignored.
pub fn lock() -> MutexGuard<'static, ()> {
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Rebuild every kernel-global from scratch.
pub fn init_kernel() {
    mm::reset_temp_slot();
    table::PROCESS_TABLE.reset();
    crate::sched::scheduler::reset();
    crate::fs::file::reset_open_files();
    crate::fs::unregister_vfs();
    net::reset_sockets();
    gpu::unregister_gpu();
    elf::unregister_loader();
    crate::timer::reset();

    let base = FrameNumber::new(arch::SIM_PHYS_BASE >> 12);
    mm::init(base, arch::SIM_PHYS_FRAMES, None).expect("mm init");

    crate::process::init().expect("process init");
}

extern "C" fn parked_thread() -> ! {
    loop {
        arch::halt();
    }
}

/// A kernel-thread record, enqueued READY.
pub fn spawn_kernel_record(name: &str) -> &'static Process {
    creation::create_kernel_thread(name, parked_thread).expect("kernel thread")
}

/// A user-process record with a fresh address space, enqueued READY.
pub fn spawn_user_record(name: &str, parent: Pid) -> &'static Process {
    let memory = ProcessMemory::new_user(AddressSpace::create().expect("address space"), 0x0900_0000);
    creation::create_user_process(
        name,
        memory,
        VirtualAddress::new(0x0804_8000),
        VirtualAddress::new(USER_STACK_TOP - 16),
        parent,
    )
    .expect("user process")
}

/// A user-process record parented to whoever is current.
pub fn spawn_user_task(name: &str) -> &'static Process {
    let parent = crate::sched::current_pid().unwrap_or(Pid(0));
    spawn_user_record(name, parent)
}

/// Map one zeroed, writable page into a process at `va`.
pub fn map_scratch_page(process: &Process, va: u32) {
    let frame = mm::frame_allocator::alloc_frame().expect("frame");
    mm::zero_frame(frame);
    let memory = process.memory.lock();
    memory
        .space
        .as_ref()
        .expect("user space")
        .map_user_page(
            VirtualAddress::new(va),
            frame,
            PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER,
        )
        .expect("map scratch");
}

/// Write bytes into a process's user memory.
pub fn poke_user(process: &Process, va: u32, bytes: &[u8]) {
    let memory = process.memory.lock();
    let space = memory.space.as_ref().expect("user space");
    mm::uaccess::copy_to_user(space, VirtualAddress::new(va), bytes).expect("poke");
}

/// Read bytes out of a process's user memory.
pub fn peek_user(process: &Process, va: u32, len: usize) -> Vec<u8> {
    let mut buf = std::vec![0u8; len];
    let memory = process.memory.lock();
    let space = memory.space.as_ref().expect("user space");
    mm::uaccess::copy_from_user(space, VirtualAddress::new(va), &mut buf).expect("peek");
    buf
}

// ---------------------------------------------------------------------------
// Mock VFS
// ---------------------------------------------------------------------------

struct MockFsInner {
    names: BTreeMap<String, InodeId>,
    data: BTreeMap<InodeId, Vec<u8>>,
    dirs: BTreeMap<String, InodeId>,
    cwd: String,
    next_inode: InodeId,
}

/// In-memory filesystem standing in for the VFS collaborator.
pub struct MockVfs {
    inner: StdMutex<MockFsInner>,
}

impl MockVfs {
    pub fn new() -> Self {
        Self {
            inner: StdMutex::new(MockFsInner {
                names: BTreeMap::new(),
                data: BTreeMap::new(),
                dirs: BTreeMap::new(),
                cwd: String::from("/"),
                next_inode: 1,
            }),
        }
    }

    /// Seed a file with contents.
    pub fn add_file(&self, path: &str, contents: &[u8]) -> InodeId {
        let mut inner = self.inner.lock().unwrap();
        let inode = inner.next_inode;
        inner.next_inode += 1;
        inner.names.insert(String::from(path), inode);
        inner.data.insert(inode, contents.to_vec());
        inode
    }

    /// Install a leaked instance as the registered VFS.
    pub fn install() -> &'static MockVfs {
        let leaked: &'static MockVfs = std::boxed::Box::leak(std::boxed::Box::new(MockVfs::new()));
        crate::fs::register_vfs(leaked);
        leaked
    }
}

impl Vfs for MockVfs {
    fn resolve(&self, path: &str) -> Option<InodeId> {
        let inner = self.inner.lock().unwrap();
        inner
            .names
            .get(path)
            .or_else(|| inner.dirs.get(path))
            .copied()
    }

    fn inode(&self, id: InodeId) -> Option<InodeInfo> {
        let inner = self.inner.lock().unwrap();
        if let Some(data) = inner.data.get(&id) {
            return Some(InodeInfo {
                inode: id,
                size: data.len() as u32,
                kind: NodeKind::File,
                nlink: 1,
            });
        }
        if inner.dirs.values().any(|&d| d == id) {
            return Some(InodeInfo {
                inode: id,
                size: 0,
                kind: NodeKind::Directory,
                nlink: 1,
            });
        }
        None
    }

    fn create_file(&self, path: &str) -> KernelResult<InodeId> {
        let mut inner = self.inner.lock().unwrap();
        if inner.names.contains_key(path) {
            return Err(FsError::AlreadyExists.into());
        }
        let inode = inner.next_inode;
        inner.next_inode += 1;
        inner.names.insert(String::from(path), inode);
        inner.data.insert(inode, Vec::new());
        Ok(inode)
    }

    fn mkdir(&self, path: &str) -> KernelResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.dirs.contains_key(path) || inner.names.contains_key(path) {
            return Err(FsError::AlreadyExists.into());
        }
        let inode = inner.next_inode;
        inner.next_inode += 1;
        inner.dirs.insert(String::from(path), inode);
        Ok(())
    }

    fn unlink(&self, path: &str) -> KernelResult<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.names.remove(path) {
            Some(inode) => {
                inner.data.remove(&inode);
                Ok(())
            }
            None => Err(FsError::NotFound.into()),
        }
    }

    fn chdir(&self, path: &str) -> KernelResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.dirs.contains_key(path) || path == "/" {
            inner.cwd = String::from(path);
            Ok(())
        } else {
            Err(FsError::NotFound.into())
        }
    }

    fn cwd_path(&self, buf: &mut [u8]) -> usize {
        let inner = self.inner.lock().unwrap();
        let bytes = inner.cwd.as_bytes();
        let len = bytes.len().min(buf.len());
        buf[..len].copy_from_slice(&bytes[..len]);
        len
    }

    fn read(&self, id: InodeId, offset: u32, buf: &mut [u8]) -> KernelResult<usize> {
        let inner = self.inner.lock().unwrap();
        let data = inner.data.get(&id).ok_or(FsError::NotFound)?;
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let count = (data.len() - offset).min(buf.len());
        buf[..count].copy_from_slice(&data[offset..offset + count]);
        Ok(count)
    }

    fn write(&self, id: InodeId, offset: u32, buf: &[u8]) -> KernelResult<usize> {
        let mut inner = self.inner.lock().unwrap();
        let data = inner.data.get_mut(&id).ok_or(FsError::NotFound)?;
        let offset = offset as usize;
        if data.len() < offset + buf.len() {
            data.resize(offset + buf.len(), 0);
        }
        data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }
}

// ---------------------------------------------------------------------------
// Mock ELF loader
// ---------------------------------------------------------------------------

/// Loader that maps a single zeroed code page at the canonical entry.
pub struct MockLoader;

impl MockLoader {
    pub const ENTRY: u32 = 0x0804_8000;
    pub const BRK_START: u32 = 0x0804_9000;

    pub fn install() {
        static LOADER: MockLoader = MockLoader;
        elf::register_loader(&LOADER);
    }
}

impl elf::ElfLoader for MockLoader {
    fn load(&self, path: &str, space: &mut AddressSpace) -> KernelResult<elf::LoadedImage> {
        if path.is_empty() {
            return Err(FsError::NotFound.into());
        }
        let frame = mm::frame_allocator::alloc_frame()?;
        mm::zero_frame(frame);
        space.map_user_page(
            VirtualAddress::new(Self::ENTRY),
            frame,
            PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER,
        )?;
        Ok(elf::LoadedImage {
            entry: VirtualAddress::new(Self::ENTRY),
            brk_start: Self::BRK_START,
        })
    }
}

// ---------------------------------------------------------------------------
// Mock UDP stack
// ---------------------------------------------------------------------------

/// Loopback stack: sendto queues the datagram, recv pops it.
pub struct MockUdp {
    inner: StdMutex<MockUdpInner>,
}

struct MockUdpInner {
    next_sock: net::SockId,
    queues: BTreeMap<net::SockId, Vec<(Vec<u8>, u32, u16)>>,
}

impl MockUdp {
    pub fn install() -> &'static MockUdp {
        let leaked: &'static MockUdp = std::boxed::Box::leak(std::boxed::Box::new(MockUdp {
            inner: StdMutex::new(MockUdpInner {
                next_sock: 1,
                queues: BTreeMap::new(),
            }),
        }));
        net::register_udp(leaked);
        leaked
    }

    /// Drop a datagram into a socket's queue.
    pub fn inject(&self, sock: net::SockId, payload: &[u8], src_ip: u32, src_port: u16) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .queues
            .entry(sock)
            .or_default()
            .push((payload.to_vec(), src_ip, src_port));
    }
}

impl net::UdpStack for MockUdp {
    fn bind(&self, _port: u16) -> Option<net::SockId> {
        let mut inner = self.inner.lock().unwrap();
        let sock = inner.next_sock;
        inner.next_sock += 1;
        inner.queues.insert(sock, Vec::new());
        Some(sock)
    }

    fn sendto(&self, sock: net::SockId, dst_ip: u32, dst_port: u16, buf: &[u8]) -> KernelResult<usize> {
        // Loop the datagram straight back to the sender's queue.
        self.inject(sock, buf, dst_ip, dst_port);
        Ok(buf.len())
    }

    fn recv(&self, sock: net::SockId, buf: &mut [u8]) -> KernelResult<(usize, u32, u16)> {
        let mut inner = self.inner.lock().unwrap();
        let queue = inner
            .queues
            .get_mut(&sock)
            .ok_or(crate::error::KernelError::NotFound { resource: "socket" })?;
        if queue.is_empty() {
            // The real stack blocks; the mock reports would-block so the
            // test can drive the sequence explicitly.
            return Err(crate::error::KernelError::WouldBlock);
        }
        let (payload, ip, port) = queue.remove(0);
        let count = payload.len().min(buf.len());
        buf[..count].copy_from_slice(&payload[..count]);
        Ok((count, ip, port))
    }

    fn unbind(&self, sock: net::SockId) {
        let mut inner = self.inner.lock().unwrap();
        inner.queues.remove(&sock);
    }
}

// ---------------------------------------------------------------------------
// Mock GPU transport
// ---------------------------------------------------------------------------

/// Transport that counts contexts and remembers the last submission.
pub struct MockGpu {
    inner: StdMutex<MockGpuInner>,
}

struct MockGpuInner {
    next_ctx: gpu::CtxId,
    live: Vec<gpu::CtxId>,
    last_submit: Option<(gpu::CtxId, Vec<u8>)>,
}

impl MockGpu {
    pub fn install() -> &'static MockGpu {
        let leaked: &'static MockGpu = std::boxed::Box::leak(std::boxed::Box::new(MockGpu {
            inner: StdMutex::new(MockGpuInner {
                next_ctx: 1,
                live: Vec::new(),
                last_submit: None,
            }),
        }));
        gpu::register_gpu(leaked);
        leaked
    }

    pub fn live_contexts(&self) -> usize {
        self.inner.lock().unwrap().live.len()
    }

    pub fn last_submit(&self) -> Option<(gpu::CtxId, Vec<u8>)> {
        self.inner.lock().unwrap().last_submit.clone()
    }
}

impl gpu::GpuTransport for MockGpu {
    fn create_context(&self) -> Option<gpu::CtxId> {
        let mut inner = self.inner.lock().unwrap();
        let ctx = inner.next_ctx;
        inner.next_ctx += 1;
        inner.live.push(ctx);
        Some(ctx)
    }

    fn submit(&self, ctx: gpu::CtxId, commands: &[u8]) -> KernelResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.live.contains(&ctx) {
            return Err(crate::error::KernelError::NotFound { resource: "gpu context" });
        }
        inner.last_submit = Some((ctx, commands.to_vec()));
        Ok(())
    }

    fn destroy_context(&self, ctx: gpu::CtxId) {
        let mut inner = self.inner.lock().unwrap();
        inner.live.retain(|&c| c != ctx);
    }
}
