//! Memory management module
//!
//! Physical frame allocation, per-process two-level address spaces with a
//! shared kernel high half, the temporary-mapping slot, and user-memory
//! copy helpers. The virtual layout is the classic 3/1 split:
//!
//! ```text
//! 0x0000_0000 .. 0x4000_0000   process image + heap (program break)
//! 0x4000_0000 .. 0xbfc0_0000   anonymous mappings (mmap, grows upward)
//! 0xbfc0_0000 .. 0xc000_0000   user stack region
//! 0xc000_0000 .. 0xffff_ffff   kernel half, shared by every directory
//! ```

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::arch;
use crate::error::KernelResult;

pub mod address_space;
pub mod frame_allocator;
pub mod heap;
pub mod page_table;
pub mod uaccess;

pub use address_space::AddressSpace;
pub use frame_allocator::{FrameNumber, FRAME_SIZE};
pub use page_table::{PageTable, PageTableEntry, PteFlags};

/// Size of a virtual page (matches the physical frame size).
pub const PAGE_SIZE: usize = 4096;

/// log2(PAGE_SIZE)
pub const PAGE_SHIFT: u32 = 12;

/// First kernel virtual address; everything at or above is off limits to
/// user pointers.
pub const KERNEL_BASE: u32 = 0xc000_0000;

/// Lower bound of the user stack region, directly below the kernel half.
pub const USER_STACK_LOW: u32 = 0xbfc0_0000;

/// Exclusive top of the user stack region.
pub const USER_STACK_TOP: u32 = KERNEL_BASE;

/// Anonymous mappings start here and grow upward toward the stack region.
pub const USER_MMAP_BASE: u32 = 0x4000_0000;

/// Entries per page directory / page table.
pub const PD_ENTRIES: usize = 1024;

/// First page-directory index of the kernel half (768 for the 3/1 split).
pub const KERNEL_PDE_FIRST: usize = (KERNEL_BASE >> 22) as usize;

/// Physical memory address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysicalAddress(pub u32);

impl PhysicalAddress {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    pub const fn as_frame(&self) -> FrameNumber {
        FrameNumber::new(self.0 >> PAGE_SHIFT)
    }

    pub const fn page_offset(&self) -> u32 {
        self.0 & (PAGE_SIZE as u32 - 1)
    }
}

/// Virtual memory address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualAddress(pub u32);

impl VirtualAddress {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Page-directory index (top 10 bits).
    pub const fn pd_index(&self) -> usize {
        (self.0 >> 22) as usize
    }

    /// Page-table index (middle 10 bits).
    pub const fn pt_index(&self) -> usize {
        ((self.0 >> PAGE_SHIFT) & 0x3ff) as usize
    }

    pub const fn page_base(&self) -> Self {
        Self(self.0 & !(PAGE_SIZE as u32 - 1))
    }

    pub const fn page_offset(&self) -> u32 {
        self.0 & (PAGE_SIZE as u32 - 1)
    }

    pub const fn is_page_aligned(&self) -> bool {
        self.0 & (PAGE_SIZE as u32 - 1) == 0
    }

    pub const fn is_kernel(&self) -> bool {
        self.0 >= KERNEL_BASE
    }
}

impl core::fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Round up to the next page boundary. Saturates at the top of the
/// address space rather than wrapping.
pub const fn page_align_up(value: u32) -> u32 {
    match value.checked_add(PAGE_SIZE as u32 - 1) {
        Some(v) => v & !(PAGE_SIZE as u32 - 1),
        None => u32::MAX & !(PAGE_SIZE as u32 - 1),
    }
}

/// Round down to the containing page boundary.
pub const fn page_align_down(value: u32) -> u32 {
    value & !(PAGE_SIZE as u32 - 1)
}

// ---------------------------------------------------------------------------
// Temporary mapping slot
// ---------------------------------------------------------------------------

static TEMP_SLOT_BUSY: AtomicBool = AtomicBool::new(false);

/// Map one frame at the reserved kernel slot and return a pointer to it.
///
/// The slot is single and non-reentrant; callers pair each call with
/// [`temp_unmap`]. Prefer the [`TempFrame`] guard which does the pairing.
pub fn temp_map(frame: FrameNumber) -> *mut u8 {
    let was_busy = TEMP_SLOT_BUSY.swap(true, Ordering::Acquire);
    assert!(!was_busy, "temp-map slot acquired reentrantly");
    arch::temp_map_install(frame.addr().as_u32())
}

/// Release the reserved slot.
pub fn temp_unmap() {
    arch::temp_map_clear();
    TEMP_SLOT_BUSY.store(false, Ordering::Release);
}

/// Scoped temporary mapping of a single frame.
pub struct TempFrame {
    ptr: *mut u8,
}

impl TempFrame {
    pub fn map(frame: FrameNumber) -> Self {
        Self {
            ptr: temp_map(frame),
        }
    }

    pub fn ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// View the frame as a page table.
    pub fn as_table(&self) -> *mut PageTable {
        self.ptr as *mut PageTable
    }
}

impl Drop for TempFrame {
    fn drop(&mut self) {
        temp_unmap();
    }
}

/// Zero-fill one frame through the temp slot.
pub fn zero_frame(frame: FrameNumber) {
    let mapping = TempFrame::map(frame);
    // SAFETY: the temp slot maps exactly one writable frame.
    unsafe {
        core::ptr::write_bytes(mapping.ptr(), 0, PAGE_SIZE);
    }
}

// ---------------------------------------------------------------------------
// Kernel address-space root
// ---------------------------------------------------------------------------

static KERNEL_ROOT: AtomicU32 = AtomicU32::new(0);

/// Physical address of the kernel page directory (the idle/bootstrap
/// address space, and the template every process directory clones its
/// high half from).
pub fn kernel_root() -> PhysicalAddress {
    PhysicalAddress::new(KERNEL_ROOT.load(Ordering::Relaxed))
}

/// Initialize the memory manager.
///
/// `phys_start`/`phys_frames` describe the managed physical range. Boot
/// passes the live kernel directory in `kernel_root`; when absent (host
/// runs) a fresh zeroed directory is allocated. All 256 kernel-half leaf
/// tables are allocated up front so that directory clones made later
/// share every kernel edit.
pub fn init(
    phys_start: FrameNumber,
    phys_frames: usize,
    existing_root: Option<PhysicalAddress>,
) -> KernelResult<()> {
    frame_allocator::init(phys_start, phys_frames);

    let root = match existing_root {
        Some(root) => root,
        None => {
            let frame = frame_allocator::alloc_frame()?;
            zero_frame(frame);
            frame.addr()
        }
    };
    KERNEL_ROOT.store(root.as_u32(), Ordering::Relaxed);
    arch::load_address_space(root.as_u32());

    address_space::ensure_kernel_tables(root)?;

    log::info!(
        "mm: {} frames managed, kernel root at 0x{:08x}",
        phys_frames,
        root.as_u32()
    );
    Ok(())
}

/// Reset the temp-slot bookkeeping. Test support only.
#[cfg(test)]
pub(crate) fn reset_temp_slot() {
    TEMP_SLOT_BUSY.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_decomposition() {
        let va = VirtualAddress::new(0xc040_1234);
        assert_eq!(va.pd_index(), 769);
        assert_eq!(va.pt_index(), 1);
        assert_eq!(va.page_offset(), 0x234);
        assert_eq!(va.page_base(), VirtualAddress::new(0xc040_1000));
        assert!(va.is_kernel());
        assert!(!VirtualAddress::new(KERNEL_BASE - 1).is_kernel());
    }

    #[test]
    fn test_page_alignment() {
        assert_eq!(page_align_up(0), 0);
        assert_eq!(page_align_up(1), 0x1000);
        assert_eq!(page_align_up(0x1000), 0x1000);
        assert_eq!(page_align_up(0x1001), 0x2000);
        assert_eq!(page_align_down(0x1fff), 0x1000);
        // Saturation at the top, never a wrap to zero.
        assert_eq!(page_align_up(u32::MAX - 5), 0xffff_f000);
    }

    #[test]
    fn test_kernel_pde_split() {
        assert_eq!(KERNEL_PDE_FIRST, 768);
        assert_eq!(VirtualAddress::new(KERNEL_BASE).pd_index(), 768);
        assert_eq!(VirtualAddress::new(USER_STACK_LOW).pd_index(), 767);
    }
}
