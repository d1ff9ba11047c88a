//! Bounded priority admission queue
//!
//! Three priority levels with FIFO order inside each level. This is a
//! load-shedding buffer, not a fair scheduler: while High work is waiting,
//! Low work starves, and admission past capacity fails immediately.

use std::collections::VecDeque;

/// Admission priority. Lower number means higher priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    High = 0,
    #[default]
    Medium = 1,
    Low = 2,
}

impl Priority {
    const LEVELS: usize = 3;

    fn index(self) -> usize {
        self as usize
    }

    /// Stable label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

/// The queue was at capacity; the request was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Request queue is full")]
pub struct QueueFull;

/// Bounded three-level priority queue.
///
/// `pop` always returns the item with the lowest priority number, breaking
/// ties by admission order (each level's `VecDeque` preserves FIFO).
#[derive(Debug)]
pub struct PriorityQueue<T> {
    levels: [VecDeque<T>; Priority::LEVELS],
    capacity: usize,
}

impl<T> PriorityQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            levels: Default::default(),
            capacity,
        }
    }

    /// Admit an item, or fail immediately when the queue is at capacity.
    pub fn push(&mut self, priority: Priority, item: T) -> Result<(), QueueFull> {
        if self.len() >= self.capacity {
            return Err(QueueFull);
        }
        self.levels[priority.index()].push_back(item);
        Ok(())
    }

    /// The highest-priority, oldest-admitted item, or `None` when empty.
    pub fn pop(&mut self) -> Option<T> {
        self.levels.iter_mut().find_map(VecDeque::pop_front)
    }

    /// Total queued items across all levels.
    pub fn len(&self) -> usize {
        self.levels.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity (reported by stats, not a hardcoded constant).
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
