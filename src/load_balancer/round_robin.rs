//! Round-robin selection.

/// Cyclic cursor over `len` targets.
///
/// The cursor is always in `[0, len)` and every selection advances it by
/// exactly one, so consecutive selections never skip or repeat a target.
/// It is mutated through `&mut self`; callers that share it across tasks must
/// pair the selection with the use of the target under one lock.
#[derive(Debug, Clone, Default)]
pub struct RoundRobin {
    cursor: usize,
    len: usize,
}

impl RoundRobin {
    pub fn new(len: usize) -> Self {
        Self { cursor: 0, len }
    }

    /// Start the rotation at `cursor` (taken modulo `len`).
    pub fn starting_at(len: usize, cursor: usize) -> Self {
        let cursor = if len == 0 { 0 } else { cursor % len };
        Self { cursor, len }
    }

    /// Index the next selection will return.
    pub fn current(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Select the current index and advance. `None` when there are no targets.
    pub fn next_index(&mut self) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        let selected = self.cursor;
        self.cursor = (self.cursor + 1) % self.len;
        Some(selected)
    }
}
