//! Bounded undo history of whole-board snapshots.

use crate::task::Task;
use std::collections::VecDeque;

/// Keeps at most `depth` previous boards; the oldest falls off first.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<Vec<Task>>,
    depth: usize,
}

impl History {
    pub fn new(depth: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(depth),
            depth,
        }
    }

    /// Remember `tasks` as the state before a mutation.
    pub fn push(&mut self, tasks: Vec<Task>) {
        if self.depth == 0 {
            return;
        }
        while self.entries.len() >= self.depth {
            self.entries.pop_front();
        }
        self.entries.push_back(tasks);
    }

    pub fn pop(&mut self) -> Option<Vec<Task>> {
        self.entries.pop_back()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(10)
    }
}
