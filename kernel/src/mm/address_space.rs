//! Per-process address spaces
//!
//! Every process owns a page directory whose low 768 entries are private
//! and whose high 256 entries are copied from the kernel directory at
//! creation. The copies are pointers to the *same* leaf tables, so a
//! kernel mapping installed later through [`map_kernel_page`] becomes
//! visible in every address space without any broadcast.
//!
//! All table access goes through the temp-map slot; no table is ever
//! dereferenced by a virtual alias that might not be mapped.

use super::frame_allocator::{self, FrameNumber};
use super::page_table::{PageTableEntry, PteFlags};
use super::{
    zero_frame, PhysicalAddress, TempFrame, VirtualAddress, KERNEL_PDE_FIRST, PD_ENTRIES,
};
use crate::arch;
use crate::error::{KernelError, KernelResult};

/// Owning handle to one process's page directory.
///
/// No `Drop` impl: teardown walks the tables and frees user frames, which
/// must happen exactly once at a well-defined point in process exit.
/// Call [`AddressSpace::destroy`].
#[derive(Debug)]
pub struct AddressSpace {
    root: PhysicalAddress,
}

impl AddressSpace {
    /// Allocate a fresh directory and clone the kernel high half into it.
    pub fn create() -> KernelResult<Self> {
        let dir = frame_allocator::alloc_frame()?;
        zero_frame(dir);

        let mut kernel_half = [PageTableEntry::empty(); PD_ENTRIES - KERNEL_PDE_FIRST];
        {
            let mapping = TempFrame::map(super::kernel_root().as_frame());
            // SAFETY: the kernel root is a live page directory; the temp
            // slot maps exactly that frame.
            let dir_ref = unsafe { &*mapping.as_table() };
            for (i, slot) in kernel_half.iter_mut().enumerate() {
                *slot = dir_ref[KERNEL_PDE_FIRST + i];
            }
        }
        {
            let mapping = TempFrame::map(dir);
            // SAFETY: dir is freshly allocated and zeroed; exclusive here.
            let dir_ref = unsafe { &mut *mapping.as_table() };
            for (i, entry) in kernel_half.iter().enumerate() {
                dir_ref[KERNEL_PDE_FIRST + i] = *entry;
            }
        }

        Ok(Self { root: dir.addr() })
    }

    /// Wrap the kernel's own directory (the idle/bootstrap context).
    pub fn kernel() -> Self {
        Self {
            root: super::kernel_root(),
        }
    }

    pub fn root(&self) -> PhysicalAddress {
        self.root
    }

    fn read_pde(&self, dir_idx: usize) -> PageTableEntry {
        let mapping = TempFrame::map(self.root.as_frame());
        // SAFETY: root is this space's directory frame.
        unsafe { (&(*mapping.as_table()))[dir_idx] }
    }

    /// Install a leaf mapping in the user half, allocating the leaf table
    /// on first use. `flags` should include PRESENT.
    pub fn map_user_page(
        &self,
        vaddr: VirtualAddress,
        frame: FrameNumber,
        flags: PteFlags,
    ) -> KernelResult<()> {
        if vaddr.is_kernel() {
            return Err(KernelError::InvalidAddress {
                addr: vaddr.as_u32(),
            });
        }

        let dir_idx = vaddr.pd_index();
        let pde = self.read_pde(dir_idx);
        let table_frame = if pde.is_present() {
            pde.frame()
        } else {
            let new_table = frame_allocator::alloc_frame()?;
            zero_frame(new_table);
            let mapping = TempFrame::map(self.root.as_frame());
            // SAFETY: root is this space's directory frame.
            unsafe {
                (&mut (*mapping.as_table()))[dir_idx].set(new_table, PteFlags::user_table());
            }
            new_table
        };

        {
            let mapping = TempFrame::map(table_frame);
            // SAFETY: table_frame is this directory's leaf table.
            unsafe {
                (&mut (*mapping.as_table()))[vaddr.pt_index()].set(frame, flags);
            }
        }

        if self.is_live() {
            invalidate(vaddr);
        }
        Ok(())
    }

    /// Remove a leaf mapping and return the frame it pointed at. The
    /// frame is *not* freed; the caller owns that decision.
    pub fn unmap_user_page(&self, vaddr: VirtualAddress) -> Option<FrameNumber> {
        if vaddr.is_kernel() {
            return None;
        }
        let pde = self.read_pde(vaddr.pd_index());
        if !pde.is_present() {
            return None;
        }

        let frame = {
            let mapping = TempFrame::map(pde.frame());
            // SAFETY: pde points at this directory's leaf table.
            let table = unsafe { &mut *mapping.as_table() };
            let entry = &mut table[vaddr.pt_index()];
            if !entry.is_present() {
                return None;
            }
            let frame = entry.frame();
            entry.clear();
            frame
        };

        if self.is_live() {
            invalidate(vaddr);
        }
        Some(frame)
    }

    /// Translate a virtual address, honoring both levels. Returns `None`
    /// when any level is absent.
    pub fn virt_to_phys(&self, vaddr: VirtualAddress) -> Option<PhysicalAddress> {
        let pde = self.read_pde(vaddr.pd_index());
        if !pde.is_present() {
            return None;
        }
        let pte = {
            let mapping = TempFrame::map(pde.frame());
            // SAFETY: pde points at a live leaf table.
            unsafe { (&(*mapping.as_table()))[vaddr.pt_index()] }
        };
        if !pte.is_present() {
            return None;
        }
        Some(PhysicalAddress::new(
            pte.addr().as_u32() | vaddr.page_offset(),
        ))
    }

    /// Tear the space down: free every user frame, every user leaf table,
    /// then the directory. Kernel leaf tables are shared and are left
    /// alone even though the walk sees their pointers.
    pub fn destroy(self) {
        let root_frame = self.root.as_frame();

        let mut user_half = [PageTableEntry::empty(); KERNEL_PDE_FIRST];
        {
            let mapping = TempFrame::map(root_frame);
            // SAFETY: root is this space's directory frame.
            let dir_ref = unsafe { &*mapping.as_table() };
            for (i, slot) in user_half.iter_mut().enumerate() {
                *slot = dir_ref[i];
            }
        }

        for pde in user_half.iter().filter(|e| e.is_present()) {
            {
                let mapping = TempFrame::map(pde.frame());
                // SAFETY: pde points at this directory's leaf table.
                let table = unsafe { &*mapping.as_table() };
                for pte in table.iter().filter(|e| e.is_present()) {
                    frame_allocator::free_frame(pte.frame());
                }
            }
            frame_allocator::free_frame(pde.frame());
        }

        frame_allocator::free_frame(root_frame);
    }

    fn is_live(&self) -> bool {
        arch::current_address_space() == self.root.as_u32()
    }
}

/// Edit the kernel high half of the live mapping set. The leaf tables are
/// shared, so the edit is visible to every process.
pub fn map_kernel_page(
    vaddr: VirtualAddress,
    frame: FrameNumber,
    flags: PteFlags,
) -> KernelResult<()> {
    if !vaddr.is_kernel() {
        return Err(KernelError::InvalidAddress {
            addr: vaddr.as_u32(),
        });
    }

    let root = super::kernel_root().as_frame();
    let dir_idx = vaddr.pd_index();
    let pde = {
        let mapping = TempFrame::map(root);
        // SAFETY: the kernel root is a live page directory.
        unsafe { (&(*mapping.as_table()))[dir_idx] }
    };
    // ensure_kernel_tables preallocates the whole kernel half; an absent
    // entry here means init was skipped.
    if !pde.is_present() {
        return Err(KernelError::NotInitialized { subsystem: "mm" });
    }

    {
        let mapping = TempFrame::map(pde.frame());
        // SAFETY: pde points at a shared kernel leaf table.
        unsafe {
            (&mut (*mapping.as_table()))[vaddr.pt_index()].set(frame, flags);
        }
    }
    invalidate(vaddr);
    Ok(())
}

/// Flush one translation from the TLB after a PTE edit.
pub fn invalidate(vaddr: VirtualAddress) {
    arch::flush_tlb_page(vaddr.as_u32());
}

/// Preallocate every kernel-half leaf table in `root` so directory clones
/// made at any later time share the complete set.
pub fn ensure_kernel_tables(root: PhysicalAddress) -> KernelResult<()> {
    for dir_idx in KERNEL_PDE_FIRST..PD_ENTRIES {
        let present = {
            let mapping = TempFrame::map(root.as_frame());
            // SAFETY: root is the kernel page directory.
            unsafe { (&(*mapping.as_table()))[dir_idx].is_present() }
        };
        if present {
            continue;
        }

        let table = frame_allocator::alloc_frame()?;
        zero_frame(table);
        let mapping = TempFrame::map(root.as_frame());
        // SAFETY: root is the kernel page directory.
        unsafe {
            (&mut (*mapping.as_table()))[dir_idx].set(table, PteFlags::kernel_rw());
        }
    }
    Ok(())
}
