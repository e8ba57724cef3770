//! Wait queues and the synchronization primitives built on them
//!
//! A wait queue is a FIFO of PIDs threaded intrusively through the
//! process records, so the sleep path allocates nothing. Enqueuing is the
//! suspension point: it atomically (interrupts off, single CPU) parks the
//! caller, records which queue it is on, and yields. Waking moves a task
//! back to the ready queue; waking an already-ready task is a no-op.
//!
//! The blocking `Mutex`, `Semaphore`, `CondVar` and `RwLock` for kernel
//! threads all reduce to these queues plus a few atomics.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::Mutex as SpinMutex;

use super::pcb::{Pid, ProcessState};
use super::table;
use crate::arch::IrqGuard;
use crate::error::{KernelError, KernelResult};
use crate::sched;

// ---------------------------------------------------------------------------
// Wait queue
// ---------------------------------------------------------------------------

struct WqInner {
    /// PID of the first waiter, 0 when empty.
    head: u32,
    /// PID of the last waiter, 0 when empty.
    tail: u32,
    len: usize,
}

/// FIFO wait queue of blocked tasks.
pub struct WaitQueue {
    inner: SpinMutex<WqInner>,
    /// Whether a signal may pull a waiter off this queue early.
    interruptible: bool,
}

impl WaitQueue {
    pub const fn new(interruptible: bool) -> Self {
        Self {
            inner: SpinMutex::new(WqInner {
                head: 0,
                tail: 0,
                len: 0,
            }),
            interruptible,
        }
    }

    pub fn interruptible(&self) -> bool {
        self.interruptible
    }

    /// Stable identifier of this queue (its address).
    fn id(&self) -> usize {
        self as *const Self as usize
    }

    fn push(&self, pid: Pid) {
        let mut inner = self.inner.lock();
        if let Some(p) = table::get_process(pid) {
            p.set_wq_next(0);
        }
        if inner.tail == 0 {
            inner.head = pid.0;
        } else if let Some(tail) = table::get_process(Pid(inner.tail)) {
            tail.set_wq_next(pid.0);
        }
        inner.tail = pid.0;
        inner.len += 1;
    }

    fn pop(&self) -> Option<Pid> {
        let mut inner = self.inner.lock();
        if inner.head == 0 {
            return None;
        }
        let pid = inner.head;
        let next = table::get_process(Pid(pid)).map(|p| p.wq_next()).unwrap_or(0);
        inner.head = next;
        if inner.head == 0 {
            inner.tail = 0;
        }
        inner.len -= 1;
        Some(Pid(pid))
    }

    /// Unlink an arbitrary waiter (signal wake path).
    pub fn remove(&self, pid: Pid) -> bool {
        let mut inner = self.inner.lock();
        let mut prev = 0u32;
        let mut cursor = inner.head;
        while cursor != 0 {
            let next = table::get_process(Pid(cursor)).map(|p| p.wq_next()).unwrap_or(0);
            if cursor == pid.0 {
                if prev == 0 {
                    inner.head = next;
                } else if let Some(p) = table::get_process(Pid(prev)) {
                    p.set_wq_next(next);
                }
                if inner.tail == pid.0 {
                    inner.tail = prev;
                }
                inner.len -= 1;
                return true;
            }
            prev = cursor;
            cursor = next;
        }
        false
    }

    pub fn contains(&self, pid: Pid) -> bool {
        let inner = self.inner.lock();
        let mut cursor = inner.head;
        while cursor != 0 {
            if cursor == pid.0 {
                return true;
            }
            cursor = table::get_process(Pid(cursor)).map(|p| p.wq_next()).unwrap_or(0);
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().len == 0
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    /// Park the current task on this queue without yielding. The caller
    /// schedules afterwards; [`sleep_on`](Self::sleep_on) does both.
    pub fn block_current(&self) {
        let process = match super::current_process() {
            Some(p) => p,
            None => return,
        };
        let _irq = IrqGuard::new();
        if process.blocked_on_queue() == self.id() {
            return; // already parked here
        }
        self.push(process.pid);
        process.set_state(ProcessState::Blocked);
        process.set_blocked_on(self.id());
    }

    /// Block the current task on this queue and yield. Returns when a
    /// wake (or an interrupting signal) has made the task runnable again.
    pub fn sleep_on(&self) {
        self.block_current();
        sched::schedule();
    }

    /// Wake the head waiter. FIFO; idempotent on already-ready tasks.
    pub fn wake_one(&self) -> bool {
        let _irq = IrqGuard::new();
        while let Some(pid) = self.pop() {
            if let Some(process) = table::get_process(pid) {
                process.set_blocked_on(0);
                if process.get_state() == ProcessState::Blocked {
                    process.set_state(ProcessState::Ready);
                    sched::enqueue_ready(pid);
                }
                return true;
            }
            // Stale link to a reaped record; drop it and keep going.
        }
        false
    }

    /// Wake every waiter. Returns how many were woken.
    pub fn wake_all(&self) -> usize {
        let mut count = 0;
        while self.wake_one() {
            count += 1;
        }
        count
    }
}

// ---------------------------------------------------------------------------
// Mutex
// ---------------------------------------------------------------------------

/// Blocking mutex for kernel threads. Not recursive; unlock requires the
/// caller to be the owner.
pub struct Mutex {
    locked: AtomicBool,
    /// PID of the owner, 0 when unlocked (or locked from the boot
    /// context, which has no PID).
    owner: AtomicU32,
    waiters: WaitQueue,
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            owner: AtomicU32::new(0),
            waiters: WaitQueue::new(false),
        }
    }

    /// Acquire without blocking. Returns whether the lock was taken.
    pub fn try_lock(&self) -> bool {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            let owner = super::current_process().map(|p| p.pid.0).unwrap_or(0);
            self.owner.store(owner, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Acquire, blocking on the wait queue until the owner releases.
    pub fn lock(&self) {
        while !self.try_lock() {
            self.waiters.sleep_on();
        }
    }

    /// Release the mutex and wake one waiter.
    ///
    /// Returns `Err` if the calling task does not own the lock; a
    /// programming error the caller surfaces rather than a panic inside
    /// a critical section.
    pub fn unlock(&self) -> KernelResult<()> {
        self.check_owner()?;
        self.owner.store(0, Ordering::Relaxed);
        self.locked.store(false, Ordering::Release);
        self.waiters.wake_one();
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    fn check_owner(&self) -> KernelResult<()> {
        if !self.is_locked() {
            return Err(KernelError::InvalidState {
                expected: "locked mutex",
                actual: "unlocked",
            });
        }
        if let Some(process) = super::current_process() {
            if self.owner.load(Ordering::Relaxed) != process.pid.0 {
                return Err(KernelError::PermissionDenied {
                    operation: "mutex unlock",
                });
            }
        }
        Ok(())
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Counting semaphore
// ---------------------------------------------------------------------------

pub struct Semaphore {
    count: AtomicU32,
    waiters: WaitQueue,
}

impl Semaphore {
    pub const fn new(initial: u32) -> Self {
        Self {
            count: AtomicU32::new(initial),
            waiters: WaitQueue::new(false),
        }
    }

    /// P operation: take a unit, blocking while the count is zero.
    pub fn wait(&self) {
        while !self.try_wait() {
            self.waiters.sleep_on();
        }
    }

    /// Non-blocking P. Returns whether a unit was taken.
    pub fn try_wait(&self) -> bool {
        let mut count = self.count.load(Ordering::Relaxed);
        while count > 0 {
            match self.count.compare_exchange(
                count,
                count - 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(seen) => count = seen,
            }
        }
        false
    }

    /// V operation: return a unit and wake one waiter.
    pub fn post(&self) {
        self.count.fetch_add(1, Ordering::Release);
        self.waiters.wake_one();
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Condition variable
// ---------------------------------------------------------------------------

pub struct CondVar {
    waiters: WaitQueue,
}

impl CondVar {
    pub const fn new() -> Self {
        Self {
            waiters: WaitQueue::new(false),
        }
    }

    /// Release `mutex`, block, and reacquire once woken. Spurious
    /// wakeups are possible; callers re-check their predicate.
    pub fn wait(&self, mutex: &Mutex) -> KernelResult<()> {
        {
            let _irq = IrqGuard::new();
            mutex.unlock()?;
            self.waiters.block_current();
        }
        sched::schedule();
        mutex.lock();
        Ok(())
    }

    pub fn signal(&self) {
        self.waiters.wake_one();
    }

    pub fn broadcast(&self) {
        self.waiters.wake_all();
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Read-write lock
// ---------------------------------------------------------------------------

/// Reader-writer lock. No writer preference; starvation is an accepted
/// trade-off for the simple scheme.
pub struct RwLock {
    readers: AtomicU32,
    writer: AtomicBool,
    read_waiters: WaitQueue,
    write_waiters: WaitQueue,
}

impl RwLock {
    pub const fn new() -> Self {
        Self {
            readers: AtomicU32::new(0),
            writer: AtomicBool::new(false),
            read_waiters: WaitQueue::new(false),
            write_waiters: WaitQueue::new(false),
        }
    }

    pub fn try_read_lock(&self) -> bool {
        let _irq = IrqGuard::new();
        if self.writer.load(Ordering::Acquire) {
            false
        } else {
            self.readers.fetch_add(1, Ordering::Acquire);
            true
        }
    }

    pub fn read_lock(&self) {
        while !self.try_read_lock() {
            self.read_waiters.sleep_on();
        }
    }

    pub fn read_unlock(&self) {
        let _irq = IrqGuard::new();
        let previous = self.readers.fetch_sub(1, Ordering::Release);
        if previous == 1 {
            self.write_waiters.wake_one();
        }
    }

    pub fn try_write_lock(&self) -> bool {
        let _irq = IrqGuard::new();
        if self.writer.load(Ordering::Acquire) || self.readers.load(Ordering::Acquire) != 0 {
            false
        } else {
            self.writer.store(true, Ordering::Release);
            true
        }
    }

    pub fn write_lock(&self) {
        while !self.try_write_lock() {
            self.write_waiters.sleep_on();
        }
    }

    pub fn write_unlock(&self) {
        let _irq = IrqGuard::new();
        self.writer.store(false, Ordering::Release);
        self.read_waiters.wake_all();
        self.write_waiters.wake_one();
    }

    pub fn reader_count(&self) -> u32 {
        self.readers.load(Ordering::Relaxed)
    }

    pub fn writer_active(&self) -> bool {
        self.writer.load(Ordering::Relaxed)
    }
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn test_wait_queue_fifo_order() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let a = test_support::spawn_kernel_record("wq-a");
        let b = test_support::spawn_kernel_record("wq-b");
        let queue = WaitQueue::new(true);

        crate::sched::adopt_current(a.pid);
        queue.sleep_on();
        crate::sched::adopt_current(b.pid);
        queue.sleep_on();

        assert_eq!(queue.len(), 2);
        assert!(queue.contains(a.pid));
        assert_eq!(a.get_state(), ProcessState::Blocked);

        assert!(queue.wake_one());
        assert_eq!(a.get_state(), ProcessState::Ready);
        assert_eq!(b.get_state(), ProcessState::Blocked);

        assert!(queue.wake_one());
        assert_eq!(b.get_state(), ProcessState::Ready);
        assert!(!queue.wake_one());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_wait_queue_remove_middle() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let a = test_support::spawn_kernel_record("rm-a");
        let b = test_support::spawn_kernel_record("rm-b");
        let c = test_support::spawn_kernel_record("rm-c");
        let queue = WaitQueue::new(true);

        for p in [a, b, c] {
            crate::sched::adopt_current(p.pid);
            queue.sleep_on();
        }

        assert!(queue.remove(b.pid));
        assert!(!queue.contains(b.pid));
        assert_eq!(queue.len(), 2);

        assert!(queue.wake_one());
        assert_eq!(a.get_state(), ProcessState::Ready);
        assert!(queue.wake_one());
        assert_eq!(c.get_state(), ProcessState::Ready);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_sleep_on_is_single_park() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let a = test_support::spawn_kernel_record("park");
        let queue = WaitQueue::new(true);
        crate::sched::adopt_current(a.pid);
        queue.sleep_on();
        // A second sleep on the same queue must not double-link the task.
        queue.sleep_on();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_mutex_lock_unlock_round_trip() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let p = test_support::spawn_kernel_record("mtx");
        crate::sched::adopt_current(p.pid);

        let mutex = Mutex::new();
        assert!(!mutex.is_locked());
        mutex.lock();
        assert!(mutex.is_locked());
        assert!(!mutex.try_lock());
        mutex.unlock().unwrap();
        assert!(!mutex.is_locked());
    }

    #[test]
    fn test_mutex_unlock_requires_owner() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let a = test_support::spawn_kernel_record("own-a");
        let b = test_support::spawn_kernel_record("own-b");
        let mutex = Mutex::new();

        crate::sched::adopt_current(a.pid);
        mutex.lock();

        crate::sched::adopt_current(b.pid);
        assert!(matches!(
            mutex.unlock(),
            Err(KernelError::PermissionDenied { .. })
        ));

        crate::sched::adopt_current(a.pid);
        mutex.unlock().unwrap();
        // Unlocking an unlocked mutex is an invalid state, not a panic.
        assert!(mutex.unlock().is_err());
    }

    #[test]
    fn test_semaphore_counts() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let sem = Semaphore::new(2);
        assert!(sem.try_wait());
        assert!(sem.try_wait());
        assert!(!sem.try_wait());
        sem.post();
        assert_eq!(sem.count(), 1);
        assert!(sem.try_wait());
    }

    #[test]
    fn test_rwlock_readers_exclude_writer() {
        let _g = test_support::lock();
        test_support::init_kernel();

        let lock = RwLock::new();
        assert!(lock.try_read_lock());
        assert!(lock.try_read_lock());
        assert_eq!(lock.reader_count(), 2);
        assert!(!lock.try_write_lock());

        lock.read_unlock();
        lock.read_unlock();
        assert!(lock.try_write_lock());
        assert!(lock.writer_active());
        assert!(!lock.try_read_lock());
        lock.write_unlock();
        assert!(!lock.writer_active());
    }
}
