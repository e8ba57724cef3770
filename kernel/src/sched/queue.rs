//! Ready queue
//!
//! A fixed ring of PIDs sized to the process table. Enqueue refuses
//! duplicates so that waking an already-ready task stays idempotent, and
//! `remove` exists for kill tearing a ready task out of circulation.

use spin::Mutex;

use crate::process::{Pid, MAX_PROCESSES};

/// FIFO ring of ready PIDs.
pub struct ReadyQueue {
    slots: [u32; MAX_PROCESSES],
    head: usize,
    tail: usize,
    count: usize,
}

impl ReadyQueue {
    pub const fn new() -> Self {
        Self {
            slots: [0; MAX_PROCESSES],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn contains(&self, pid: Pid) -> bool {
        let mut idx = self.head;
        for _ in 0..self.count {
            if self.slots[idx] == pid.0 {
                return true;
            }
            idx = (idx + 1) % MAX_PROCESSES;
        }
        false
    }

    /// Append a PID. Duplicates and a full ring report `false`.
    pub fn enqueue(&mut self, pid: Pid) -> bool {
        if pid.0 == 0 || self.count == MAX_PROCESSES || self.contains(pid) {
            return false;
        }
        self.slots[self.tail] = pid.0;
        self.tail = (self.tail + 1) % MAX_PROCESSES;
        self.count += 1;
        true
    }

    /// Take the head PID.
    pub fn dequeue(&mut self) -> Option<Pid> {
        if self.count == 0 {
            return None;
        }
        let pid = self.slots[self.head];
        self.head = (self.head + 1) % MAX_PROCESSES;
        self.count -= 1;
        Some(Pid(pid))
    }

    /// Remove a specific PID, compacting the ring.
    pub fn remove(&mut self, pid: Pid) -> bool {
        if self.count == 0 {
            return false;
        }
        let mut kept = [0u32; MAX_PROCESSES];
        let mut kept_count = 0;
        let mut found = false;

        let mut idx = self.head;
        for _ in 0..self.count {
            if self.slots[idx] == pid.0 {
                found = true;
            } else {
                kept[kept_count] = self.slots[idx];
                kept_count += 1;
            }
            idx = (idx + 1) % MAX_PROCESSES;
        }

        if found {
            self.slots = kept;
            self.head = 0;
            self.tail = kept_count % MAX_PROCESSES;
            self.count = kept_count;
        }
        found
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Global ready queue protected by a spinlock; every access site also
/// holds the interrupt guard.
pub static READY_QUEUE: Mutex<ReadyQueue> = Mutex::new(ReadyQueue::new());
