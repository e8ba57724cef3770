//! Host-target architecture shims
//!
//! Compiled whenever the crate is not building for bare-metal i386 (the
//! unit test suite, coverage runs). Physical memory is a static arena so
//! page-table structures are real bytes the tests can walk; everything
//! hardware-flavored degrades to a recorded value or a no-op. `halt`
//! advances the tick counter so tick-polling loops terminate.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, Ordering};

/// Base "physical" address of the simulated arena. Frames start at 1 MiB,
/// mirroring the real machine's lowmem layout.
pub const SIM_PHYS_BASE: u32 = 0x0010_0000;

/// Number of 4 KiB frames in the simulated arena (16 MiB).
pub const SIM_PHYS_FRAMES: usize = 4096;

const ARENA_BYTES: usize = SIM_PHYS_FRAMES * 4096;

/// Kept for API parity with the bare-metal module.
pub const TEMP_MAP_VA: u32 = 0xffff_f000;

#[repr(C, align(4096))]
struct Arena(UnsafeCell<[u8; ARENA_BYTES]>);

// SAFETY: access to arena bytes is mediated by the frame allocator and the
// temp-map discipline, exactly like real physical memory.
unsafe impl Sync for Arena {}

static ARENA: Arena = Arena(UnsafeCell::new([0u8; ARENA_BYTES]));

static CURRENT_ROOT: AtomicU32 = AtomicU32::new(0);

/// Translate a simulated physical address to a host pointer.
///
/// Panics on addresses outside the arena; handing out wild pointers would
/// turn a kernel bug into host-memory corruption.
pub fn frame_ptr(phys_addr: u32) -> *mut u8 {
    let offset = phys_addr
        .checked_sub(SIM_PHYS_BASE)
        .expect("physical address below simulated arena") as usize;
    assert!(offset < ARENA_BYTES, "physical address beyond simulated arena");
    // SAFETY: offset is in bounds; the arena is 'static.
    unsafe { (ARENA.0.get() as *mut u8).add(offset) }
}

/// Interrupts are a fiction on the host; report them enabled.
pub fn interrupts_enabled() -> bool {
    true
}

/// No-op interrupt guard for the host target.
pub struct IrqGuard;

impl IrqGuard {
    pub fn new() -> Self {
        Self
    }
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Stand-in for HLT: advance the tick counter so loops that poll the
/// timer make progress in tests.
pub fn halt() {
    crate::timer::on_tick();
}

/// Record the "loaded" page-directory root.
pub fn load_address_space(root: u32) {
    CURRENT_ROOT.store(root, Ordering::Relaxed);
}

/// Most recently loaded page-directory root.
pub fn current_address_space() -> u32 {
    CURRENT_ROOT.load(Ordering::Relaxed)
}

/// TLB maintenance is a no-op without an MMU.
pub fn flush_tlb_page(_vaddr: u32) {}

/// The temp slot maps straight into the arena.
pub fn temp_map_install(frame_addr: u32) -> *mut u8 {
    frame_ptr(frame_addr)
}

/// Nothing to tear down on the host.
pub fn temp_map_clear() {}
