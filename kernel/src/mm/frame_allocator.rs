//! Physical frame allocator
//!
//! A single bitmap allocator over the managed physical range (0 = free,
//! 1 = allocated). Single-frame allocation takes the first free bit;
//! contiguous allocation scans first-fit for an aligned run. Failure is
//! signalled to the caller, never logged and never a panic; policy
//! belongs to the call site. Frames are not reference counted here and
//! are handed out dirty; callers that need zeroed memory go through the
//! temp-map slot.

use spin::Mutex;

use super::{PhysicalAddress, PAGE_SHIFT};
use crate::arch::IrqGuard;
use crate::error::FrameAllocatorError;

/// Size of a physical frame (4 KiB)
pub const FRAME_SIZE: usize = 4096;

const BITMAP_WORDS: usize = 2048;

/// Upper bound on managed frames (512 MiB of physical memory).
pub const MAX_FRAMES: usize = BITMAP_WORDS * 64;

/// Frame allocation result
pub type Result<T> = core::result::Result<T, FrameAllocatorError>;

/// Physical frame number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameNumber(u32);

impl FrameNumber {
    pub const fn new(num: u32) -> Self {
        Self(num)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    pub const fn addr(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << PAGE_SHIFT)
    }

    pub const fn offset(&self, frames: u32) -> Self {
        Self(self.0 + frames)
    }
}

struct Inner {
    /// 1 bit per frame relative to `start`; 0 = free, 1 = allocated.
    bitmap: [u64; BITMAP_WORDS],
    /// First managed frame number.
    start: u32,
    /// Managed frame count.
    total: usize,
    /// Current free count.
    free: usize,
}

impl Inner {
    const fn new() -> Self {
        Self {
            bitmap: [u64::MAX; BITMAP_WORDS],
            start: 0,
            total: 0,
            free: 0,
        }
    }

    fn is_used(&self, idx: usize) -> bool {
        self.bitmap[idx / 64] & (1 << (idx % 64)) != 0
    }

    fn set_used(&mut self, idx: usize) {
        self.bitmap[idx / 64] |= 1 << (idx % 64);
    }

    fn set_free(&mut self, idx: usize) {
        self.bitmap[idx / 64] &= !(1 << (idx % 64));
    }
}

/// Bitmap frame allocator
pub struct FrameAllocator {
    inner: Mutex<Inner>,
}

impl FrameAllocator {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    /// (Re)initialize over `[start, start + count)`. Everything outside
    /// the range stays marked allocated so it can never be handed out.
    pub fn init(&self, start: FrameNumber, count: usize) {
        let count = count.min(MAX_FRAMES);
        let _irq = IrqGuard::new();
        let mut inner = self.inner.lock();
        inner.bitmap = [u64::MAX; BITMAP_WORDS];
        inner.start = start.as_u32();
        inner.total = count;
        inner.free = count;
        for idx in 0..count {
            inner.set_free(idx);
        }
    }

    /// Allocate any single free frame.
    pub fn alloc(&self) -> Result<FrameNumber> {
        let _irq = IrqGuard::new();
        let mut inner = self.inner.lock();
        let mut found = None;
        for (word_idx, word) in inner.bitmap.iter().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let bit = (!*word).trailing_zeros() as usize;
            let idx = word_idx * 64 + bit;
            if idx < inner.total {
                found = Some(idx);
            }
            break;
        }
        match found {
            Some(idx) => {
                inner.set_used(idx);
                inner.free -= 1;
                Ok(FrameNumber::new(inner.start + idx as u32))
            }
            None => Err(FrameAllocatorError::OutOfMemory),
        }
    }

    /// Allocate `n` consecutive frames whose base frame number is a
    /// multiple of `align_pages`. First fit.
    pub fn alloc_contiguous(&self, n: usize, align_pages: usize) -> Result<FrameNumber> {
        if n == 0 || n > MAX_FRAMES {
            return Err(FrameAllocatorError::InvalidSize);
        }
        let align = align_pages.max(1) as u32;

        let _irq = IrqGuard::new();
        let mut inner = self.inner.lock();

        let mut idx = 0usize;
        'scan: while idx + n <= inner.total {
            let frame_num = inner.start + idx as u32;
            let misalign = frame_num % align;
            if misalign != 0 {
                idx += (align - misalign) as usize;
                continue;
            }
            for run in 0..n {
                if inner.is_used(idx + run) {
                    idx = idx + run + 1;
                    continue 'scan;
                }
            }
            for run in 0..n {
                inner.set_used(idx + run);
            }
            inner.free -= n;
            return Ok(FrameNumber::new(inner.start + idx as u32));
        }
        Err(FrameAllocatorError::OutOfMemory)
    }

    /// Return one frame to the pool.
    ///
    /// Freeing a frame that is already free (or outside the managed
    /// range) leaves the bitmap untouched: the structure is never
    /// corrupted by a caller error.
    pub fn free(&self, frame: FrameNumber) {
        let _irq = IrqGuard::new();
        let mut inner = self.inner.lock();
        let num = frame.as_u32();
        if num < inner.start || (num - inner.start) as usize >= inner.total {
            return;
        }
        let idx = (num - inner.start) as usize;
        if inner.is_used(idx) {
            inner.set_free(idx);
            inner.free += 1;
        }
    }

    /// Return a contiguous run to the pool.
    pub fn free_contiguous(&self, base: FrameNumber, n: usize) {
        for i in 0..n {
            self.free(base.offset(i as u32));
        }
    }

    /// Whether the allocator currently considers `frame` allocated.
    pub fn is_allocated(&self, frame: FrameNumber) -> bool {
        let inner = self.inner.lock();
        let num = frame.as_u32();
        if num < inner.start || (num - inner.start) as usize >= inner.total {
            return true; // outside the range is permanently "allocated"
        }
        inner.is_used((num - inner.start) as usize)
    }

    pub fn free_count(&self) -> usize {
        self.inner.lock().free
    }

    pub fn total_count(&self) -> usize {
        self.inner.lock().total
    }
}

impl Default for FrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Global frame allocator instance
pub static FRAME_ALLOCATOR: FrameAllocator = FrameAllocator::new();

/// (Re)initialize the global allocator over a physical range.
pub fn init(start: FrameNumber, count: usize) {
    FRAME_ALLOCATOR.init(start, count);
}

/// Allocate any free frame.
pub fn alloc_frame() -> Result<FrameNumber> {
    FRAME_ALLOCATOR.alloc()
}

/// Allocate an aligned contiguous run of frames.
pub fn alloc_frames_contiguous(n: usize, align_pages: usize) -> Result<FrameNumber> {
    FRAME_ALLOCATOR.alloc_contiguous(n, align_pages)
}

/// Free one frame.
pub fn free_frame(frame: FrameNumber) {
    FRAME_ALLOCATOR.free(frame);
}

/// Free a contiguous run of frames.
pub fn free_frames_contiguous(base: FrameNumber, n: usize) {
    FRAME_ALLOCATOR.free_contiguous(base, n);
}

/// Current number of free frames.
pub fn free_count() -> usize {
    FRAME_ALLOCATOR.free_count()
}

/// Total managed frames.
pub fn total_count() -> usize {
    FRAME_ALLOCATOR.total_count()
}
