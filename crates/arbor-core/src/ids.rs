#![forbid(unsafe_code)]

//! Explicitly owned identifier allocation.
//!
//! Node identity comes from an [`IdGenerator`] held by whoever builds nodes
//! (the render context), never from a process-wide counter, so tests can
//! reset or swap it.

use std::cell::Cell;
use std::rc::Rc;

/// Monotonic id source. Clones share the same counter.
#[derive(Clone, Debug)]
pub struct IdGenerator {
    next: Rc<Cell<u64>>,
    start: u64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    /// Generator whose first id is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    #[must_use]
    pub fn starting_at(start: u64) -> Self {
        Self {
            next: Rc::new(Cell::new(start)),
            start,
        }
    }

    /// Allocate the next id.
    pub fn next_id(&self) -> u64 {
        let id = self.next.get();
        self.next.set(id + 1);
        id
    }

    /// The id the next call to [`next_id`](Self::next_id) will return.
    #[must_use]
    pub fn peek(&self) -> u64 {
        self.next.get()
    }

    /// Restart from the initial value for every clone.
    pub fn reset(&self) {
        self.next.set(self.start);
    }
}
