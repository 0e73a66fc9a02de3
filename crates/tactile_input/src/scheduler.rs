//! Cooperative priority scheduling
//!
//! The input engine never blocks and never runs deferred work inline. Work
//! that must happen "later" (draining leftover staged input, reevaluating
//! focus after an ancestor was disabled, resynchronizing the mouse after the
//! tree changed) is handed to a [`Scheduler`] as a one-shot task.
//!
//! [`LocalScheduler`] is a single-threaded implementation suitable for hosts
//! that pump their own loop, and for tests.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

/// Scheduler priority, lowest first
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Idle,
    Background,
    Input,
    Loaded,
    Render,
    Normal,
    Send,
}

/// A one-shot deferred task
pub type Task = Box<dyn FnOnce()>;

/// Per-thread cooperative queue the engine schedules continuations on
pub trait Scheduler {
    fn schedule(&self, priority: Priority, task: Task);
}

struct Entry {
    priority: Priority,
    seq: u64,
    task: Task,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Max-heap: higher priority first, then FIFO within a priority.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Single-threaded priority queue pumped by the host
#[derive(Default)]
pub struct LocalScheduler {
    queue: RefCell<BinaryHeap<Entry>>,
    next_seq: Cell<u64>,
}

impl LocalScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Highest pending priority, if any
    pub fn peek_priority(&self) -> Option<Priority> {
        self.queue.borrow().peek().map(|entry| entry.priority)
    }

    /// Run the highest-priority task. Returns false if the queue was empty.
    pub fn run_next(&self) -> bool {
        // The borrow must end before the task runs: tasks schedule more tasks.
        let entry = self.queue.borrow_mut().pop();
        match entry {
            Some(entry) => {
                tracing::trace!("Running task at {:?}", entry.priority);
                (entry.task)();
                true
            }
            None => false,
        }
    }

    /// Run tasks until the queue is empty, including tasks scheduled meanwhile
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl Scheduler for LocalScheduler {
    fn schedule(&self, priority: Priority, task: Task) {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        self.queue.borrow_mut().push(Entry {
            priority,
            seq,
            task,
        });
    }
}
