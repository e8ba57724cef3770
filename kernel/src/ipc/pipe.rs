//! Anonymous pipes
//!
//! A bounded byte ring with one reader side and one writer side, each
//! side counted by the open-file entries that reference it. Reads block
//! while the ring is empty and a writer remains; a drained ring with no
//! writers reads as end-of-file. Writes block while the ring is full and
//! a reader remains; a write with no readers at all raises SIGPIPE on
//! the caller and fails with a broken-pipe error. Both wait queues are
//! interruptible so a signal can pull a blocked peer out.

use core::sync::atomic::{AtomicU32, Ordering};

use alloc::sync::Arc;
use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::process::signal::{self, SIGPIPE};
use crate::process::WaitQueue;

/// Ring capacity in bytes.
pub const PIPE_CAPACITY: usize = 1024;

struct PipeBuf {
    data: [u8; PIPE_CAPACITY],
    head: usize,
    len: usize,
}

impl PipeBuf {
    fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let count = self.len.min(buf.len());
        for slot in buf.iter_mut().take(count) {
            *slot = self.data[self.head];
            self.head = (self.head + 1) % PIPE_CAPACITY;
            self.len -= 1;
        }
        count
    }

    fn write_from(&mut self, buf: &[u8]) -> usize {
        let space = PIPE_CAPACITY - self.len;
        let count = space.min(buf.len());
        for &byte in buf.iter().take(count) {
            let tail = (self.head + self.len) % PIPE_CAPACITY;
            self.data[tail] = byte;
            self.len += 1;
        }
        count
    }
}

/// One anonymous pipe.
pub struct Pipe {
    buffer: Mutex<PipeBuf>,
    readers: AtomicU32,
    writers: AtomicU32,
    read_waiters: WaitQueue,
    write_waiters: WaitQueue,
}

impl Pipe {
    /// A fresh pipe with one reader endpoint and one writer endpoint.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            buffer: Mutex::new(PipeBuf {
                data: [0; PIPE_CAPACITY],
                head: 0,
                len: 0,
            }),
            readers: AtomicU32::new(1),
            writers: AtomicU32::new(1),
            read_waiters: WaitQueue::new(true),
            write_waiters: WaitQueue::new(true),
        })
    }

    pub fn reader_count(&self) -> u32 {
        self.readers.load(Ordering::Acquire)
    }

    pub fn writer_count(&self) -> u32 {
        self.writers.load(Ordering::Acquire)
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.lock().len
    }

    /// Read up to `buf.len()` bytes. Blocks on an empty ring while a
    /// writer remains; returns 0 (end-of-file) once the ring drains with
    /// no writers left.
    pub fn read(&self, buf: &mut [u8]) -> KernelResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            {
                let mut ring = self.buffer.lock();
                if ring.len > 0 {
                    let count = ring.read_into(buf);
                    drop(ring);
                    self.write_waiters.wake_one();
                    return Ok(count);
                }
            }
            if self.writer_count() == 0 {
                return Ok(0);
            }
            self.read_waiters.sleep_on();
            if interrupted() {
                return Err(KernelError::Interrupted);
            }
        }
    }

    /// Write all of `buf`, blocking as the ring fills. A write with no
    /// readers raises SIGPIPE on the caller and fails; readers vanishing
    /// mid-write truncate the transfer.
    pub fn write(&self, buf: &[u8]) -> KernelResult<usize> {
        let mut written = 0;
        loop {
            if self.reader_count() == 0 {
                raise_sigpipe();
                if written > 0 {
                    return Ok(written);
                }
                return Err(KernelError::BrokenPipe);
            }

            let chunk = {
                let mut ring = self.buffer.lock();
                ring.write_from(&buf[written..])
            };
            if chunk > 0 {
                written += chunk;
                self.read_waiters.wake_one();
            }
            if written == buf.len() {
                return Ok(written);
            }
            if chunk == 0 {
                self.write_waiters.sleep_on();
                if interrupted() {
                    return Err(KernelError::Interrupted);
                }
            }
        }
    }

    /// One reader endpoint closed.
    pub fn drop_reader(&self) {
        if self.readers.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Writers blocked on a full ring must observe the breakage.
            self.write_waiters.wake_all();
        }
    }

    /// One writer endpoint closed.
    pub fn drop_writer(&self) {
        if self.writers.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Readers blocked on an empty ring now see end-of-file.
            self.read_waiters.wake_all();
        }
    }
}

fn interrupted() -> bool {
    crate::process::current_process()
        .map(signal::has_actionable_pending)
        .unwrap_or(false)
}

fn raise_sigpipe() {
    if let Some(process) = crate::process::current_process() {
        let _ = signal::post(process.pid, SIGPIPE);
    }
}
