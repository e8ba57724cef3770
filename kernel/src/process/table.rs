//! Global process table
//!
//! A fixed arena of process slots; slot 0 is reserved so a PID of zero
//! can serve as the universal "no process" sentinel in intrusive links.
//! Records never move while allocated, which is what makes the
//! `&'static Process` accessors sound; a record is dropped only when the
//! slot is released at reap time.

use core::sync::atomic::{AtomicUsize, Ordering};

use alloc::vec::Vec;
use spin::Mutex;

use super::pcb::{Pid, Process, ProcessState};
use super::MAX_PROCESSES;
use crate::arch::IrqGuard;
use crate::error::KernelError;

struct Slots([Option<Process>; MAX_PROCESSES]);

/// Fixed-size process arena
pub struct ProcessTable {
    slots: Mutex<Slots>,
    process_count: AtomicUsize,
}

impl ProcessTable {
    pub const fn new() -> Self {
        Self {
            slots: Mutex::new(Slots([const { None }; MAX_PROCESSES])),
            process_count: AtomicUsize::new(0),
        }
    }

    /// Place a record in the first free slot (slot 0 stays reserved).
    pub fn insert(&self, process: Process) -> Result<&'static Process, KernelError> {
        let _irq = IrqGuard::new();
        let mut slots = self.slots.lock();
        for slot in slots.0.iter_mut().skip(1) {
            if slot.is_none() {
                *slot = Some(process);
                self.process_count.fetch_add(1, Ordering::Relaxed);
                let installed = slot.as_ref().unwrap();
                // SAFETY: the record sits in a static arena and is not
                // moved or dropped until the slot is released at reap
                // time; extending the borrow past the lock is the
                // kernel-wide access model for process records.
                return Ok(unsafe { &*(installed as *const Process) });
            }
        }
        Err(KernelError::ResourceExhausted {
            resource: "process table",
        })
    }

    /// Look a record up by PID.
    pub fn get(&self, pid: Pid) -> Option<&'static Process> {
        if pid.0 == 0 {
            return None;
        }
        let slots = self.slots.lock();
        for slot in slots.0.iter().flatten() {
            if slot.pid == pid {
                // SAFETY: see `insert`.
                return Some(unsafe { &*(slot as *const Process) });
            }
        }
        None
    }

    /// Release a slot, dropping the record (and with it the kernel
    /// stack). Returns whether a record was removed.
    pub fn remove(&self, pid: Pid) -> bool {
        let _irq = IrqGuard::new();
        let mut slots = self.slots.lock();
        for slot in slots.0.iter_mut() {
            if slot.as_ref().is_some_and(|p| p.pid == pid) {
                *slot = None;
                self.process_count.fetch_sub(1, Ordering::Relaxed);
                return true;
            }
        }
        false
    }

    /// PIDs of every live or zombie child of `parent`.
    pub fn children_of(&self, parent: Pid) -> Vec<Pid> {
        let slots = self.slots.lock();
        slots
            .0
            .iter()
            .flatten()
            .filter(|p| p.parent() == parent)
            .map(|p| p.pid)
            .collect()
    }

    /// Visit every allocated record.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Process),
    {
        let slots = self.slots.lock();
        for slot in slots.0.iter().flatten() {
            f(slot);
        }
    }

    /// State of a PID, [`ProcessState::Unused`] when no such record.
    pub fn state_of(&self, pid: Pid) -> ProcessState {
        self.get(pid)
            .map(|p| p.get_state())
            .unwrap_or(ProcessState::Unused)
    }

    pub fn count(&self) -> usize {
        self.process_count.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub fn reset(&self) {
        let mut slots = self.slots.lock();
        for slot in slots.0.iter_mut() {
            *slot = None;
        }
        self.process_count.store(0, Ordering::Relaxed);
    }
}

/// Global process table instance
pub static PROCESS_TABLE: ProcessTable = ProcessTable::new();

pub fn init() {
    log::info!("process: table ready ({} slots)", MAX_PROCESSES);
}

/// Look a record up by PID.
pub fn get_process(pid: Pid) -> Option<&'static Process> {
    PROCESS_TABLE.get(pid)
}

/// Release a slot.
pub fn remove_process(pid: Pid) -> bool {
    PROCESS_TABLE.remove(pid)
}

/// Number of allocated slots.
pub fn process_count() -> usize {
    PROCESS_TABLE.count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::memory::ProcessMemory;
    use crate::test_support;
    use alloc::string::String;

    fn record(pid: u32, parent: u32) -> Process {
        Process::new(
            Pid(pid),
            Pid(parent),
            String::from("t"),
            ProcessMemory::new_kernel(),
        )
    }

    #[test]
    fn test_insert_get_remove() {
        let _g = test_support::lock();
        PROCESS_TABLE.reset();

        let p = PROCESS_TABLE.insert(record(10, 1)).unwrap();
        assert_eq!(p.pid, Pid(10));
        assert_eq!(PROCESS_TABLE.count(), 1);
        assert!(core::ptr::eq(PROCESS_TABLE.get(Pid(10)).unwrap(), p));

        assert!(PROCESS_TABLE.remove(Pid(10)));
        assert!(PROCESS_TABLE.get(Pid(10)).is_none());
        assert!(!PROCESS_TABLE.remove(Pid(10)));
        assert_eq!(PROCESS_TABLE.count(), 0);
    }

    #[test]
    fn test_pid_zero_never_resolves() {
        let _g = test_support::lock();
        PROCESS_TABLE.reset();
        assert!(PROCESS_TABLE.get(Pid(0)).is_none());
        assert_eq!(PROCESS_TABLE.state_of(Pid(0)), ProcessState::Unused);
    }

    #[test]
    fn test_table_fills_up() {
        let _g = test_support::lock();
        PROCESS_TABLE.reset();

        // Slot 0 is reserved, so MAX_PROCESSES - 1 records fit.
        for i in 0..(MAX_PROCESSES - 1) {
            PROCESS_TABLE.insert(record(100 + i as u32, 1)).unwrap();
        }
        assert!(matches!(
            PROCESS_TABLE.insert(record(999, 1)),
            Err(KernelError::ResourceExhausted { .. })
        ));
        PROCESS_TABLE.reset();
    }

    #[test]
    fn test_children_query() {
        let _g = test_support::lock();
        PROCESS_TABLE.reset();

        PROCESS_TABLE.insert(record(20, 1)).unwrap();
        PROCESS_TABLE.insert(record(21, 20)).unwrap();
        PROCESS_TABLE.insert(record(22, 20)).unwrap();
        PROCESS_TABLE.insert(record(23, 21)).unwrap();

        let mut kids = PROCESS_TABLE.children_of(Pid(20));
        kids.sort();
        assert_eq!(kids, alloc::vec![Pid(21), Pid(22)]);
    }

    #[test]
    fn test_slot_reuse_after_remove() {
        let _g = test_support::lock();
        PROCESS_TABLE.reset();

        PROCESS_TABLE.insert(record(30, 1)).unwrap();
        PROCESS_TABLE.insert(record(31, 1)).unwrap();
        PROCESS_TABLE.remove(Pid(30));
        // The freed slot is reused by the next insert.
        let p = PROCESS_TABLE.insert(record(32, 1)).unwrap();
        assert_eq!(p.pid, Pid(32));
        assert_eq!(PROCESS_TABLE.count(), 2);
    }
}
