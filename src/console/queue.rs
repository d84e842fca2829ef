use std::collections::VecDeque;

/// Completed input lines waiting for the reader, each ending in `\n`.
///
/// The queue has no lock of its own: it lives inside the console's input
/// state, and the condition variable paired with that lock carries the
/// empty-queue wait.
#[derive(Debug, Default)]
pub struct LineQueue {
    lines: VecDeque<String>,
    closed: bool,
}

impl LineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a line. Returns whether the queue was empty beforehand; a closed
    /// queue drops the line and reports `false`.
    pub fn push(&mut self, line: String) -> bool {
        if self.closed {
            return false;
        }
        let was_empty = self.lines.is_empty();
        self.lines.push_back(line);
        was_empty
    }

    pub fn pop(&mut self) -> Option<String> {
        self.lines.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Terminal: drops anything unread.
    pub fn close(&mut self) {
        self.closed = true;
        self.lines.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_with_empty_transition_flag() {
        let mut queue = LineQueue::new();
        assert!(queue.push("a\n".into()));
        assert!(!queue.push("b\n".into()));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().as_deref(), Some("a\n"));
        assert_eq!(queue.pop().as_deref(), Some("b\n"));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn close_drains_and_rejects() {
        let mut queue = LineQueue::new();
        queue.push("x\n".into());
        queue.close();
        assert!(queue.is_empty());
        assert!(!queue.push("y\n".into()));
        assert!(queue.is_empty());
        assert!(queue.is_closed());
    }
}
