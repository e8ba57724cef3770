//! Process record
//!
//! One fixed-size record per task, owned by the process table arena.
//! Everything the scheduler, the wait/signal layer, and the syscall
//! handlers need lives here: the kernel stack, the saved context, the
//! address-space handle with the break and VMA bookkeeping, the file
//! handle table, and the intrusive wait-queue link. Outside the table,
//! tasks are always named by PID, never by pointer.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicI32, AtomicU32, AtomicUsize, Ordering};

use alloc::boxed::Box;
use alloc::string::String;
use spin::Mutex;

use super::memory::ProcessMemory;
use super::sync::WaitQueue;
use super::KSTACK_SIZE;
use crate::arch::context::Context;
use crate::fs::file::FdTable;

/// Process ID. Non-zero for every allocated task; zero is the "no
/// process" sentinel used in intrusive links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u32);

impl Pid {
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for Pid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process state machine
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Slot sentinel: no task was ever allocated here
    Unused = 0,
    /// Record built, not yet on the ready queue
    New = 1,
    /// On the ready queue, eligible to run
    Ready = 2,
    /// The task the current-process pointer references
    Running = 3,
    /// Parked on exactly one wait queue
    Blocked = 4,
    /// Terminated, retained until the parent reaps it
    Zombie = 5,
}

impl ProcessState {
    fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::New,
            2 => Self::Ready,
            3 => Self::Running,
            4 => Self::Blocked,
            5 => Self::Zombie,
            _ => Self::Unused,
        }
    }
}

/// Exclusively owned kernel stack.
pub struct KernelStack(Box<StackStorage>);

#[repr(align(16))]
struct StackStorage([u8; KSTACK_SIZE]);

impl KernelStack {
    pub fn new() -> Self {
        Self(Box::new(StackStorage([0; KSTACK_SIZE])))
    }

    /// One past the highest usable byte; the stack grows down from here.
    pub fn top(&self) -> *mut u8 {
        let base = self.0 .0.as_ptr() as *mut u8;
        // SAFETY: base..base+KSTACK_SIZE is this stack's own allocation;
        // the one-past-the-end pointer is valid to form.
        unsafe { base.add(KSTACK_SIZE) }
    }
}

impl Default for KernelStack {
    fn default() -> Self {
        Self::new()
    }
}

/// Process record
pub struct Process {
    /// Process ID, fixed for the record's lifetime
    pub pid: Pid,

    /// Parent PID; rewritten to 0 when the task is orphaned
    parent: AtomicU32,

    /// Short diagnostic name
    pub name: String,

    /// Current state (ProcessState as u32)
    state: AtomicU32,

    /// Kernel stack, retained until the record is reaped
    pub kstack: KernelStack,

    /// Saved kernel context, touched only by the scheduler with
    /// interrupts disabled
    pub context: UnsafeCell<Context>,

    /// Address space, program break, and VMA vector
    pub memory: Mutex<ProcessMemory>,

    /// File handle table
    pub files: Mutex<FdTable>,

    /// Exit status, valid once the state is Zombie
    exit_status: AtomicI32,

    /// Queue this task's children notify on exit
    pub wait_children: WaitQueue,

    /// Pending-signal bitmask (bit n = signal n)
    pending_signals: AtomicU32,

    /// Address of the wait queue this task is blocked on; 0 when not
    /// blocked
    blocked_on: AtomicUsize,

    /// Intrusive wait-queue link: PID of the next waiter
    wq_next: AtomicU32,
}

// SAFETY: the UnsafeCell<Context> is only accessed by the scheduler inside
// an interrupts-disabled critical section on a single CPU; every other
// field is an atomic or lock-protected.
unsafe impl Sync for Process {}

impl Process {
    pub fn new(pid: Pid, parent: Pid, name: String, memory: ProcessMemory) -> Self {
        Self {
            pid,
            parent: AtomicU32::new(parent.0),
            name,
            state: AtomicU32::new(ProcessState::New as u32),
            kstack: KernelStack::new(),
            context: UnsafeCell::new(Context::zero()),
            memory: Mutex::new(memory),
            files: Mutex::new(FdTable::new()),
            exit_status: AtomicI32::new(0),
            wait_children: WaitQueue::new(true),
            pending_signals: AtomicU32::new(0),
            blocked_on: AtomicUsize::new(0),
            wq_next: AtomicU32::new(0),
        }
    }

    pub fn get_state(&self) -> ProcessState {
        ProcessState::from_u32(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ProcessState) {
        self.state.store(state as u32, Ordering::Release);
    }

    pub fn parent(&self) -> Pid {
        Pid(self.parent.load(Ordering::Acquire))
    }

    pub fn set_parent(&self, parent: Pid) {
        self.parent.store(parent.0, Ordering::Release);
    }

    pub fn exit_status(&self) -> i32 {
        self.exit_status.load(Ordering::Acquire)
    }

    pub fn set_exit_status(&self, status: i32) {
        self.exit_status.store(status, Ordering::Release);
    }

    pub fn is_alive(&self) -> bool {
        !matches!(self.get_state(), ProcessState::Zombie | ProcessState::Unused)
    }

    // --- signal bitmask ---

    pub fn pending_signals(&self) -> u32 {
        self.pending_signals.load(Ordering::Acquire)
    }

    pub fn set_pending_signal(&self, signum: u32) {
        self.pending_signals
            .fetch_or(1 << signum, Ordering::AcqRel);
    }

    pub fn clear_pending_signal(&self, signum: u32) {
        self.pending_signals
            .fetch_and(!(1 << signum), Ordering::AcqRel);
    }

    /// Lowest-numbered pending signal, if any.
    pub fn next_pending_signal(&self) -> Option<u32> {
        let mask = self.pending_signals();
        if mask == 0 {
            None
        } else {
            Some(mask.trailing_zeros())
        }
    }

    // --- wait-queue linkage (maintained under the queue's lock) ---

    pub(crate) fn blocked_on_queue(&self) -> usize {
        self.blocked_on.load(Ordering::Acquire)
    }

    pub(crate) fn set_blocked_on(&self, queue: usize) {
        self.blocked_on.store(queue, Ordering::Release);
    }

    pub(crate) fn wq_next(&self) -> u32 {
        self.wq_next.load(Ordering::Acquire)
    }

    pub(crate) fn set_wq_next(&self, pid: u32) {
        self.wq_next.store(pid, Ordering::Release);
    }
}
