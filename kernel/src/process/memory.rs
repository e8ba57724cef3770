//! Per-process memory bookkeeping
//!
//! The address-space handle, the program break, and the VMA vector for
//! anonymous mappings. Kernel threads carry no address space (`space` is
//! `None`, meaning "share the kernel's"); handlers that need a user
//! address space fail cleanly on them.
//!
//! The layout invariants enforced here: the break stays inside
//! `[brk_start, USER_MMAP_BASE)` unless VMAs are clear of it, mmap
//! placements stay inside `[USER_MMAP_BASE, USER_STACK_LOW)`, and no two
//! VMAs ever overlap.

use alloc::vec::Vec;

use super::MAX_VMAS;
use crate::error::{KernelError, KernelResult};
use crate::mm::{
    self, frame_allocator, page_align_up, AddressSpace, PteFlags, VirtualAddress, PAGE_SIZE,
    USER_MMAP_BASE, USER_STACK_LOW,
};

// Protection bits (mmap/munmap ABI)
pub const PROT_READ: u32 = 0x1;
pub const PROT_WRITE: u32 = 0x2;
pub const PROT_EXEC: u32 = 0x4;

// Mapping flags (mmap ABI)
pub const MAP_PRIVATE: u32 = 0x02;
pub const MAP_FIXED: u32 = 0x10;
pub const MAP_ANONYMOUS: u32 = 0x20;

/// Bounded number of placement probes for a kernel-chosen mmap address.
const MMAP_PLACEMENT_ATTEMPTS: usize = MAX_VMAS + 1;

/// One contiguous anonymous mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vma {
    pub base: u32,
    pub len: u32,
    pub prot: u32,
    pub flags: u32,
}

impl Vma {
    pub fn end(&self) -> u32 {
        self.base + self.len
    }

    pub fn overlaps(&self, base: u32, len: u32) -> bool {
        base < self.end() && self.base < base + len
    }
}

/// Address space, break, and VMA vector of one process.
pub struct ProcessMemory {
    /// `None` for kernel threads sharing the kernel's address space.
    pub space: Option<AddressSpace>,
    /// Where the heap segment begins (end of the loaded image).
    pub brk_start: u32,
    /// Current program break.
    pub brk: u32,
    /// Anonymous mappings, never overlapping, capacity [`MAX_VMAS`].
    pub vmas: Vec<Vma>,
}

impl ProcessMemory {
    /// Kernel-thread memory: no user half at all.
    pub fn new_kernel() -> Self {
        Self {
            space: None,
            brk_start: 0,
            brk: 0,
            vmas: Vec::new(),
        }
    }

    /// User-process memory over a freshly built address space.
    pub fn new_user(space: AddressSpace, brk_start: u32) -> Self {
        Self {
            space: Some(space),
            brk_start,
            brk: brk_start,
            vmas: Vec::new(),
        }
    }

    pub fn root_raw(&self) -> Option<u32> {
        self.space.as_ref().map(|s| s.root().as_u32())
    }

    fn space(&self) -> KernelResult<&AddressSpace> {
        self.space.as_ref().ok_or(KernelError::InvalidState {
            expected: "user address space",
            actual: "kernel thread",
        })
    }

    fn pte_flags(prot: u32) -> PteFlags {
        let mut flags = PteFlags::PRESENT | PteFlags::USER;
        if prot & PROT_WRITE != 0 {
            flags |= PteFlags::WRITABLE;
        }
        flags
    }

    /// Map `pages` zero-filled frames starting at `base`. On any failure
    /// every page mapped by this call is unmapped and freed again.
    fn map_zeroed_range(&self, base: u32, pages: usize, prot: u32) -> KernelResult<()> {
        let space = self.space()?;
        for i in 0..pages {
            let vaddr = VirtualAddress::new(base + (i * PAGE_SIZE) as u32);
            let result = frame_allocator::alloc_frame()
                .map_err(KernelError::from)
                .and_then(|frame| {
                    mm::zero_frame(frame);
                    space
                        .map_user_page(vaddr, frame, Self::pte_flags(prot))
                        .inspect_err(|_| frame_allocator::free_frame(frame))
                });
            if let Err(err) = result {
                self.unmap_range(base, i);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Unmap `pages` pages starting at `base`, freeing their frames.
    fn unmap_range(&self, base: u32, pages: usize) {
        if let Some(space) = self.space.as_ref() {
            for i in 0..pages {
                let vaddr = VirtualAddress::new(base + (i * PAGE_SIZE) as u32);
                if let Some(frame) = space.unmap_user_page(vaddr) {
                    frame_allocator::free_frame(frame);
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Program break
    // -----------------------------------------------------------------

    /// Query or move the program break.
    ///
    /// Always returns the resulting break (Linux convention), so a
    /// rejected request is visible as `returned != requested` with no
    /// side effect. Shrinking is rejected; growth maps zeroed frames and
    /// refuses to cross [`USER_STACK_LOW`] or run into a VMA.
    pub fn brk_set(&mut self, new_brk: u32) -> u32 {
        if new_brk == 0 || new_brk < self.brk || self.space.is_none() {
            return self.brk;
        }
        if new_brk > USER_STACK_LOW {
            return self.brk;
        }

        let map_from = page_align_up(self.brk);
        let map_to = page_align_up(new_brk);
        let grow_len = map_to - map_from;
        if self
            .vmas
            .iter()
            .any(|vma| grow_len > 0 && vma.overlaps(map_from, grow_len))
        {
            return self.brk;
        }

        let pages = (grow_len as usize) / PAGE_SIZE;
        if pages > 0 && self.map_zeroed_range(map_from, pages, PROT_READ | PROT_WRITE).is_err() {
            return self.brk;
        }

        self.brk = new_brk;
        self.brk
    }

    // -----------------------------------------------------------------
    // Anonymous mappings
    // -----------------------------------------------------------------

    /// Find a kernel-chosen base for a mapping of `len` bytes: start at
    /// the mmap base and linearly skip past each overlapping VMA, with a
    /// bounded number of probes.
    fn find_free_base(&self, len: u32) -> KernelResult<u32> {
        let mut candidate = USER_MMAP_BASE;
        for _ in 0..MMAP_PLACEMENT_ATTEMPTS {
            let end = candidate
                .checked_add(len)
                .ok_or(KernelError::InvalidArgument { what: "mmap length" })?;
            if end > USER_STACK_LOW {
                return Err(KernelError::OutOfMemory {
                    requested: len as usize,
                });
            }
            match self.vmas.iter().find(|vma| vma.overlaps(candidate, len)) {
                None => return Ok(candidate),
                Some(vma) => candidate = page_align_up(vma.end()),
            }
        }
        Err(KernelError::OutOfMemory {
            requested: len as usize,
        })
    }

    /// Create an anonymous mapping. Returns the chosen base address.
    ///
    /// Fixed requests are validated strictly: page aligned, inside
    /// `[USER_MMAP_BASE, USER_STACK_LOW)`, and overlap-free; the stack
    /// region is a hard limit. On any per-page failure all partial work
    /// is undone and no VMA is recorded.
    pub fn mmap(&mut self, addr: u32, len: u32, prot: u32, flags: u32) -> KernelResult<u32> {
        if len == 0 {
            return Err(KernelError::InvalidArgument { what: "mmap length" });
        }
        if flags & MAP_ANONYMOUS == 0 {
            return Err(KernelError::InvalidArgument { what: "mmap flags" });
        }
        let len = page_align_up(len);
        if len == 0 {
            // length rounded past the top of the address space
            return Err(KernelError::InvalidArgument { what: "mmap length" });
        }
        if self.vmas.len() >= MAX_VMAS {
            return Err(KernelError::ResourceExhausted { resource: "vma" });
        }
        self.space()?;

        let base = if flags & MAP_FIXED != 0 {
            let aligned = addr & (PAGE_SIZE as u32 - 1) == 0;
            let end = addr.checked_add(len);
            let in_window = addr >= USER_MMAP_BASE
                && end.map(|e| e <= USER_STACK_LOW).unwrap_or(false);
            if !aligned || !in_window {
                return Err(KernelError::InvalidAddress { addr });
            }
            if self.vmas.iter().any(|vma| vma.overlaps(addr, len)) {
                return Err(KernelError::AlreadyExists { resource: "mapping" });
            }
            addr
        } else {
            self.find_free_base(len)?
        };

        self.map_zeroed_range(base, (len as usize) / PAGE_SIZE, prot)?;
        self.vmas.push(Vma {
            base,
            len,
            prot,
            flags,
        });
        Ok(base)
    }

    /// Remove an anonymous mapping. The (base, length) pair must match a
    /// recorded VMA exactly; partial unmaps are rejected.
    pub fn munmap(&mut self, addr: u32, len: u32) -> KernelResult<()> {
        if len == 0 {
            return Err(KernelError::InvalidArgument { what: "munmap length" });
        }
        let len = page_align_up(len);
        let index = self
            .vmas
            .iter()
            .position(|vma| vma.base == addr && vma.len == len)
            .ok_or(KernelError::NotFound { resource: "vma" })?;

        self.unmap_range(addr, (len as usize) / PAGE_SIZE);
        self.vmas.remove(index);
        Ok(())
    }

    /// Release everything at exit: the whole address space goes away, so
    /// the table walk in `destroy` reclaims mapped frames in one pass.
    pub fn release(&mut self) {
        self.vmas.clear();
        if let Some(space) = self.space.take() {
            space.destroy();
        }
        self.brk = self.brk_start;
    }
}
