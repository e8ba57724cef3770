//! Bare-metal i386 support
//!
//! Interrupt-flag critical sections, address-space switching, TLB
//! maintenance, the reserved temporary-mapping slot, and the COM1 serial
//! writer behind the print macros. Boot code (out of scope here) calls
//! [`paging_init`] with the kernel page table that owns the temp slot
//! before the memory manager comes up.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Virtual address of the reserved temporary-mapping slot. Lives in the
/// last page directory entry, which boot maps with a dedicated kernel
/// page table.
pub const TEMP_MAP_VA: u32 = 0xffff_f000;

/// Page-table index of the temp slot within its kernel page table.
const TEMP_MAP_PT_INDEX: usize = 1023;

/// Kernel page table (virtual address) holding the temp slot PTE.
static TEMP_PT: AtomicUsize = AtomicUsize::new(0);

/// Physical address of the page directory most recently loaded into CR3.
static CURRENT_ROOT: AtomicU32 = AtomicU32::new(0);

fn eflags_read() -> u32 {
    let flags: u32;
    // SAFETY: pushfd/pop only moves the flags register through the stack.
    unsafe {
        core::arch::asm!("pushfd", "pop {}", out(reg) flags, options(preserves_flags));
    }
    flags
}

/// Whether the interrupt flag is currently set.
pub fn interrupts_enabled() -> bool {
    eflags_read() & 0x200 != 0
}

/// Interrupt-flag critical section guard.
///
/// Saves the interrupt flag, disables interrupts, and restores the saved
/// state on drop. Nests correctly because the restore only re-enables when
/// the flag was set at acquisition.
pub struct IrqGuard {
    was_enabled: bool,
}

impl IrqGuard {
    pub fn new() -> Self {
        let was_enabled = interrupts_enabled();
        // SAFETY: disabling interrupts is always sound; the guard restores
        // the previous state on drop.
        unsafe { x86::irq::disable() };
        Self { was_enabled }
    }
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.was_enabled {
            // SAFETY: re-enabling interrupts outside any critical section.
            unsafe { x86::irq::enable() };
        }
    }
}

/// Halt until the next interrupt. Callers run this with interrupts
/// enabled, otherwise the CPU never wakes.
pub fn halt() {
    // SAFETY: hlt with interrupts enabled resumes at the next interrupt.
    unsafe { x86::halt() };
}

/// Idle-wait inside a critical section: enable interrupts and halt as
/// one unit, then close the window again. The sti;hlt pair is atomic on
/// x86 (the interrupt shadow covers the hlt).
pub fn enable_and_halt() {
    // SAFETY: restores the interrupts-disabled state before returning.
    unsafe {
        core::arch::asm!("sti", "hlt", "cli", options(nomem, nostack));
    }
}

/// Load a page-directory root into CR3.
pub fn load_address_space(root: u32) {
    CURRENT_ROOT.store(root, Ordering::Relaxed);
    // SAFETY: the caller passes a physical address of a valid page
    // directory whose kernel half matches the running kernel's mappings.
    unsafe { x86::controlregs::cr3_write(root as u64) };
}

/// Physical address of the live page directory.
pub fn current_address_space() -> u32 {
    CURRENT_ROOT.load(Ordering::Relaxed)
}

/// Flush one page translation after a PTE edit.
pub fn flush_tlb_page(vaddr: u32) {
    // SAFETY: invlpg on any address is harmless.
    unsafe { x86::tlb::flush(vaddr as usize) };
}

/// Record the kernel page table that owns the temp-map slot. Called once
/// by boot before `mm::init`.
pub fn paging_init(temp_pt: *mut u32) {
    TEMP_PT.store(temp_pt as usize, Ordering::Relaxed);
}

/// Point the reserved temp slot at `frame_addr` and return the slot
/// pointer. The caller (mm) serializes access.
pub fn temp_map_install(frame_addr: u32) -> *mut u8 {
    let pt = TEMP_PT.load(Ordering::Relaxed) as *mut u32;
    debug_assert!(!pt.is_null(), "paging_init not called");
    // SAFETY: boot handed us the virtual address of the kernel page table
    // covering the top 4 MiB; index 1023 is reserved for this slot.
    unsafe {
        *pt.add(TEMP_MAP_PT_INDEX) = (frame_addr & !0xfff) | 0x3; // present | writable
    }
    flush_tlb_page(TEMP_MAP_VA);
    TEMP_MAP_VA as *mut u8
}

/// Clear the temp slot.
pub fn temp_map_clear() {
    let pt = TEMP_PT.load(Ordering::Relaxed) as *mut u32;
    if pt.is_null() {
        return;
    }
    // SAFETY: same slot as temp_map_install.
    unsafe {
        *pt.add(TEMP_MAP_PT_INDEX) = 0;
    }
    flush_tlb_page(TEMP_MAP_VA);
}

pub mod serial {
    //! Minimal COM1 writer for kernel output.

    use core::fmt::{self, Write};

    use spin::Mutex;

    const COM1: u16 = 0x3f8;

    struct SerialPort;

    static SERIAL: Mutex<SerialPort> = Mutex::new(SerialPort);

    impl SerialPort {
        fn write_byte(&mut self, byte: u8) {
            // SAFETY: COM1 data/status ports; polling the transmit-empty
            // bit before writing.
            unsafe {
                while x86::io::inb(COM1 + 5) & 0x20 == 0 {
                    core::hint::spin_loop();
                }
                x86::io::outb(COM1, byte);
            }
        }
    }

    impl Write for SerialPort {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for byte in s.bytes() {
                if byte == b'\n' {
                    self.write_byte(b'\r');
                }
                self.write_byte(byte);
            }
            Ok(())
        }
    }

    #[doc(hidden)]
    pub fn _print(args: fmt::Arguments) {
        let _irq = super::IrqGuard::new();
        let _ = SERIAL.lock().write_fmt(args);
    }
}
