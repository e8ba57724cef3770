//! ELF loader collaborator and user-process spawning
//!
//! Image parsing is not core business: a registered [`ElfLoader`] maps
//! the program segments into a fresh address space and reports the entry
//! point and the end of the image (where the heap begins). The core owns
//! the rest of `spawn`: building the address space, mapping the initial
//! user stack, creating the process record with the right parent, and
//! putting it on the ready queue.

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::mm::{
    self, frame_allocator, AddressSpace, PteFlags, VirtualAddress, PAGE_SIZE, USER_STACK_TOP,
};
use crate::process::{self, Pid, ProcessMemory};

/// Pages of initial user stack mapped below [`USER_STACK_TOP`].
pub const USER_STACK_PAGES: usize = 4;

/// What the loader reports back about a mapped image.
#[derive(Debug, Clone, Copy)]
pub struct LoadedImage {
    /// Entry point of the program.
    pub entry: VirtualAddress,
    /// First address past the image; the program break starts here.
    pub brk_start: u32,
}

/// ELF loader contract.
pub trait ElfLoader: Send + Sync {
    /// Map the image at `path` into `space` and describe it.
    fn load(&self, path: &str, space: &mut AddressSpace) -> KernelResult<LoadedImage>;
}

static LOADER: Mutex<Option<&'static dyn ElfLoader>> = Mutex::new(None);

pub fn register_loader(loader: &'static dyn ElfLoader) {
    *LOADER.lock() = Some(loader);
}

pub fn loader() -> Option<&'static dyn ElfLoader> {
    *LOADER.lock()
}

#[cfg(test)]
pub(crate) fn unregister_loader() {
    *LOADER.lock() = None;
}

/// Map the initial user stack. On failure every page mapped so far is
/// unmapped and freed.
fn map_user_stack(space: &AddressSpace) -> KernelResult<()> {
    let flags = PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER;
    for i in 0..USER_STACK_PAGES {
        let vaddr = VirtualAddress::new(USER_STACK_TOP - ((i + 1) * PAGE_SIZE) as u32);
        let result = frame_allocator::alloc_frame()
            .map_err(KernelError::from)
            .and_then(|frame| {
                mm::zero_frame(frame);
                space
                    .map_user_page(vaddr, frame, flags)
                    .inspect_err(|_| frame_allocator::free_frame(frame))
            });
        if let Err(err) = result {
            for j in 0..i {
                let mapped = VirtualAddress::new(USER_STACK_TOP - ((j + 1) * PAGE_SIZE) as u32);
                if let Some(frame) = space.unmap_user_page(mapped) {
                    frame_allocator::free_frame(frame);
                }
            }
            return Err(err);
        }
    }
    Ok(())
}

/// Spawn a user process from an ELF image.
///
/// Builds the address space, lets the loader map the image, maps the
/// initial stack, and enqueues the new task READY with `parent` as its
/// parent PID. Any failure tears the half-built space down completely.
pub fn spawn(path: &str, parent: Pid) -> KernelResult<Pid> {
    let loader = loader().ok_or(KernelError::NotInitialized {
        subsystem: "elf loader",
    })?;

    let mut space = AddressSpace::create()?;
    let image = match loader.load(path, &mut space) {
        Ok(image) => image,
        Err(err) => {
            space.destroy();
            return Err(err);
        }
    };
    if let Err(err) = map_user_stack(&space) {
        space.destroy();
        return Err(err);
    }

    let name = path.rsplit('/').next().unwrap_or(path);
    let memory = ProcessMemory::new_user(space, image.brk_start);
    let stack_top = VirtualAddress::new(USER_STACK_TOP - 16);
    let process = process::create_user_process(name, memory, image.entry, stack_top, parent)?;

    log::info!("spawn {} as pid {}", path, process.pid);
    Ok(process.pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::table;
    use crate::test_support::{self, MockLoader};

    #[test]
    fn test_spawn_loader_failure_destroys_space() {
        let _g = test_support::lock();
        test_support::init_kernel();
        MockLoader::install();

        let parent = test_support::spawn_kernel_record("ld-parent");
        crate::sched::adopt_current(parent.pid);

        let frames = frame_allocator::free_count();
        let slots = table::process_count();

        // The mock loader refuses an empty path before mapping anything;
        // the already-built address space must be torn down completely.
        let result = spawn("", parent.pid);
        assert!(result.is_err());
        assert_eq!(frame_allocator::free_count(), frames);
        assert_eq!(table::process_count(), slots);
    }

    #[test]
    fn test_spawn_stack_rollback_on_exhaustion() {
        let _g = test_support::lock();
        test_support::init_kernel();
        MockLoader::install();

        let parent = test_support::spawn_kernel_record("oom-parent");
        crate::sched::adopt_current(parent.pid);

        // A successful spawn takes eight frames: the directory, the image
        // page plus its leaf table, and four stack pages plus theirs.
        // Six lets the image load and the first two stack pages map, then
        // the allocator runs dry partway through the stack loop.
        let mut drained = alloc::vec::Vec::new();
        while frame_allocator::free_count() > 6 {
            drained.push(frame_allocator::alloc_frame().unwrap());
        }

        let frames = frame_allocator::free_count();
        let slots = table::process_count();

        let result = spawn("/bin/app", parent.pid);
        assert!(matches!(result, Err(KernelError::OutOfMemory { .. })));
        // The mapped stack pages were rolled back and the destroy pass
        // reclaimed the image and every table; nothing leaks and no
        // record was created.
        assert_eq!(frame_allocator::free_count(), frames);
        assert_eq!(table::process_count(), slots);

        for frame in drained {
            frame_allocator::free_frame(frame);
        }
    }
}
