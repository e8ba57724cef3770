//! User-memory access helpers
//!
//! Syscall handlers never dereference user pointers directly. Each copy
//! walks the caller's page tables and moves bytes through the temp-map
//! slot, one page at a time, so an unmapped page surfaces as an error
//! instead of a fault. Range validation against the user/kernel boundary
//! happens at the dispatch layer before these run.

use alloc::string::String;
use alloc::vec::Vec;

use super::{AddressSpace, TempFrame, VirtualAddress, PAGE_SIZE};
use crate::error::{KernelError, KernelResult};

fn for_each_page<F>(
    space: &AddressSpace,
    start: VirtualAddress,
    len: usize,
    mut f: F,
) -> KernelResult<()>
where
    F: FnMut(*mut u8, usize, usize) -> KernelResult<()>, // (page ptr, in-page offset, chunk len) at running offset
{
    let mut va = start.as_u32();
    let mut done = 0usize;
    while done < len {
        let vaddr = VirtualAddress::new(va);
        let pa = space
            .virt_to_phys(vaddr)
            .ok_or(KernelError::UnmappedMemory { addr: va })?;
        let offset = vaddr.page_offset() as usize;
        let chunk = (PAGE_SIZE - offset).min(len - done);

        let mapping = TempFrame::map(pa.as_frame());
        f(mapping.ptr(), offset, chunk)?;
        drop(mapping);

        done += chunk;
        va += chunk as u32;
    }
    Ok(())
}

/// Copy `dst.len()` bytes out of the given address space.
pub fn copy_from_user(
    space: &AddressSpace,
    src: VirtualAddress,
    dst: &mut [u8],
) -> KernelResult<()> {
    let mut done = 0usize;
    let total = dst.len();
    let dst_ptr = dst.as_mut_ptr();
    for_each_page(space, src, total, |page, offset, chunk| {
        // SAFETY: page+offset is a mapped frame through the temp slot;
        // dst has room for `done + chunk` bytes.
        unsafe {
            core::ptr::copy_nonoverlapping(page.add(offset), dst_ptr.add(done), chunk);
        }
        done += chunk;
        Ok(())
    })
}

/// Copy `src` into the given address space at `dst`.
pub fn copy_to_user(space: &AddressSpace, dst: VirtualAddress, src: &[u8]) -> KernelResult<()> {
    let mut done = 0usize;
    let src_ptr = src.as_ptr();
    for_each_page(space, dst, src.len(), |page, offset, chunk| {
        // SAFETY: as in copy_from_user, directions reversed.
        unsafe {
            core::ptr::copy_nonoverlapping(src_ptr.add(done), page.add(offset), chunk);
        }
        done += chunk;
        Ok(())
    })
}

/// Copy a NUL-terminated string out of user memory, capped at `max`
/// bytes. Only pages up to and including the terminator are touched.
pub fn copy_string_from_user(
    space: &AddressSpace,
    src: VirtualAddress,
    max: usize,
) -> KernelResult<String> {
    let mut bytes: Vec<u8> = Vec::new();
    let mut va = src.as_u32();

    while bytes.len() < max {
        let vaddr = VirtualAddress::new(va);
        let pa = space
            .virt_to_phys(vaddr)
            .ok_or(KernelError::UnmappedMemory { addr: va })?;
        let offset = vaddr.page_offset() as usize;
        let chunk = (PAGE_SIZE - offset).min(max - bytes.len());

        let mut terminated = false;
        {
            let mapping = TempFrame::map(pa.as_frame());
            for i in 0..chunk {
                // SAFETY: offset + i stays within the mapped frame.
                let byte = unsafe { *mapping.ptr().add(offset + i) };
                if byte == 0 {
                    terminated = true;
                    break;
                }
                bytes.push(byte);
            }
        }
        if terminated {
            return String::from_utf8(bytes).map_err(|_| KernelError::InvalidArgument {
                what: "string encoding",
            });
        }
        va += chunk as u32;
    }

    Err(KernelError::InvalidArgument {
        what: "string length",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::frame_allocator;
    use crate::mm::page_table::PteFlags;
    use crate::test_support;

    fn flags() -> PteFlags {
        PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER
    }

    fn map_page(space: &AddressSpace, va: u32) -> frame_allocator::FrameNumber {
        let frame = frame_allocator::alloc_frame().unwrap();
        crate::mm::zero_frame(frame);
        space
            .map_user_page(VirtualAddress::new(va), frame, flags())
            .unwrap();
        frame
    }

    fn poke(frame: frame_allocator::FrameNumber, offset: usize, data: &[u8]) {
        let mapping = TempFrame::map(frame);
        // SAFETY: writes stay within one mapped frame.
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), mapping.ptr().add(offset), data.len());
        }
    }

    #[test]
    fn test_copy_crosses_page_boundary() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let space = AddressSpace::create().unwrap();
        let f1 = map_page(&space, 0x1000_0000);
        let f2 = map_page(&space, 0x1000_1000);
        poke(f1, PAGE_SIZE - 3, b"abc");
        poke(f2, 0, b"def");

        let mut buf = [0u8; 6];
        copy_from_user(
            &space,
            VirtualAddress::new(0x1000_0000 + (PAGE_SIZE as u32 - 3)),
            &mut buf,
        )
        .unwrap();
        assert_eq!(&buf, b"abcdef");

        space.destroy();
    }

    #[test]
    fn test_copy_to_user_then_back() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let space = AddressSpace::create().unwrap();
        map_page(&space, 0x2000_0000);

        copy_to_user(&space, VirtualAddress::new(0x2000_0100), b"ember").unwrap();
        let mut buf = [0u8; 5];
        copy_from_user(&space, VirtualAddress::new(0x2000_0100), &mut buf).unwrap();
        assert_eq!(&buf, b"ember");

        space.destroy();
    }

    #[test]
    fn test_unmapped_page_is_an_error() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let space = AddressSpace::create().unwrap();
        let mut buf = [0u8; 4];
        let result = copy_from_user(&space, VirtualAddress::new(0x3000_0000), &mut buf);
        assert!(matches!(result, Err(KernelError::UnmappedMemory { .. })));
        space.destroy();
    }

    #[test]
    fn test_string_copy_stops_at_nul() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let space = AddressSpace::create().unwrap();
        let frame = map_page(&space, 0x1200_0000);
        poke(frame, 0x10, b"/bin/sh\0garbage");

        let s = copy_string_from_user(&space, VirtualAddress::new(0x1200_0010), 64).unwrap();
        assert_eq!(s, "/bin/sh");

        space.destroy();
    }

    #[test]
    fn test_unterminated_string_is_rejected() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let space = AddressSpace::create().unwrap();
        let frame = map_page(&space, 0x1300_0000);
        poke(frame, 0, &[b'x'; 32]);

        let result = copy_string_from_user(&space, VirtualAddress::new(0x1300_0000), 16);
        assert!(matches!(
            result,
            Err(KernelError::InvalidArgument { what: "string length" })
        ));

        space.destroy();
    }
}
