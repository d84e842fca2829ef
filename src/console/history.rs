use std::collections::VecDeque;

/// Bounded recall list of accepted lines with an Up/Down cursor.
///
/// The cursor sits one past the newest entry after every push. Navigation is
/// clamped at both ends.
#[derive(Debug)]
pub struct History {
    entries: VecDeque<String>,
    max: usize,
    cursor: usize,
}

impl History {
    pub fn new(max: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max: max.max(1),
            cursor: 0,
        }
    }

    /// Record `line` unless it is empty, evicting the oldest entries beyond the
    /// cap. The cursor resets either way.
    pub fn push(&mut self, line: &str) {
        if !line.is_empty() {
            self.entries.push_back(line.to_string());
            while self.entries.len() > self.max {
                self.entries.pop_front();
            }
        }
        self.cursor = self.entries.len();
    }

    pub fn previous(&mut self) -> Option<&str> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor).map(String::as_str)
    }

    pub fn next(&mut self) -> Option<&str> {
        if self.cursor + 1 >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        self.entries.get(self.cursor).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}
