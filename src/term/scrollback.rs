//! Bounded scrollback storage.
//!
//! Rows evicted from the top of the grid are detached into
//! [`ScrollbackLine`]s and held in a capacity-bounded FIFO. Pushing past
//! capacity discards the oldest line; popping returns the most recently
//! pushed line so the grid can re-materialize it when it grows.

use std::collections::VecDeque;

use super::state::Cell;

/// Default number of lines retained.
pub const DEFAULT_SCROLLBACK_CAPACITY: usize = 10_000;

/// A row detached from the grid.
#[derive(Clone, Debug, PartialEq)]
pub struct ScrollbackLine {
    pub cells: Vec<Cell>,
    /// Soft-wrap marker carried over from the grid row.
    pub wrapped: bool,
}

impl ScrollbackLine {
    /// Column count at the time the line was evicted.
    pub fn cols(&self) -> usize {
        self.cells.len()
    }
}

/// Ordered, capacity-bounded sequence of evicted lines.
///
/// Owned one-to-one by a terminal instance; never shared across sessions.
pub struct ScrollbackStore {
    lines: VecDeque<ScrollbackLine>,
    capacity: usize,
}

impl ScrollbackStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Append a line, discarding the oldest entry once at capacity.
    pub fn push(&mut self, line: ScrollbackLine) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Remove and return the most recently pushed line.
    pub fn pop(&mut self) -> Option<ScrollbackLine> {
        self.lines.pop_back()
    }

    /// Look up a retained line; index 0 is the oldest.
    pub fn line(&self, index: usize) -> Option<&ScrollbackLine> {
        self.lines.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str) -> ScrollbackLine {
        ScrollbackLine {
            cells: text.chars().map(Cell::from_char).collect(),
            wrapped: false,
        }
    }

    #[test]
    fn test_push_pop_order() {
        let mut store = ScrollbackStore::new(10);
        store.push(line("first"));
        store.push(line("second"));

        assert_eq!(store.len(), 2);
        assert_eq!(store.pop(), Some(line("second")));
        assert_eq!(store.pop(), Some(line("first")));
        assert_eq!(store.pop(), None);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut store = ScrollbackStore::new(3);
        for i in 0..8 {
            store.push(line(&format!("line{}", i)));
        }

        // 8 pushes into capacity 3: lines 0..5 are gone.
        assert_eq!(store.len(), 3);
        assert_eq!(store.line(0), Some(&line("line5")));
        assert_eq!(store.line(2), Some(&line("line7")));
    }

    #[test]
    fn test_round_trip_preserves_cells() {
        let mut store = ScrollbackStore::new(100);
        let original = line("hello");
        store.push(original.clone());

        let popped = store.pop().unwrap();
        assert_eq!(popped, original);
        assert_eq!(popped.cols(), 5);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut store = ScrollbackStore::new(0);
        store.push(line("a"));
        store.push(line("b"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.pop(), Some(line("b")));
    }
}
