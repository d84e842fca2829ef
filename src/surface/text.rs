use std::any::Any;

use unicode_width::UnicodeWidthChar;

use crate::error::{ConsoleError, Result};
use crate::style::StyleToken;

use super::DisplaySurface;

#[derive(Debug, Clone)]
struct Cell {
    ch: char,
    style: StyleToken,
}

/// In-memory styled text buffer with a caret, an optional selection and a
/// "pinned to bottom" viewport flag.
#[derive(Debug)]
pub struct TextSurface {
    cells: Vec<Cell>,
    caret: usize,
    selection: Option<(usize, usize)>,
    pinned: bool,
    editable: bool,
    beeps: usize,
}

impl Default for TextSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl TextSurface {
    pub fn new() -> Self {
        Self {
            cells: Vec::new(),
            caret: 0,
            selection: None,
            pinned: true,
            editable: false,
            beeps: 0,
        }
    }

    pub fn text(&self) -> String {
        self.cells.iter().map(|cell| cell.ch).collect()
    }

    /// Concatenation of every character rendered with `style`.
    pub fn text_with_style(&self, style: &StyleToken) -> String {
        self.cells
            .iter()
            .filter(|cell| cell.style.same(style))
            .map(|cell| cell.ch)
            .collect()
    }

    pub fn style_at(&self, position: usize) -> Option<&StyleToken> {
        self.cells.get(position).map(|cell| &cell.style)
    }

    pub fn set_selection(&mut self, start: usize, end: usize) {
        let len = self.cells.len();
        let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
        self.selection = Some((lo.min(len), hi.min(len)));
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    /// Simulate the user scrolling away from the bottom.
    pub fn scroll_up(&mut self) {
        self.pinned = false;
    }

    pub fn is_editable(&self) -> bool {
        self.editable
    }

    pub fn beeps(&self) -> usize {
        self.beeps
    }

    fn check_range(&self, start: usize, end: usize) -> Result<()> {
        if start > end || end > self.cells.len() {
            return Err(ConsoleError::render(format!(
                "range {start}..{end} outside document of length {}",
                self.cells.len()
            )));
        }
        Ok(())
    }
}

fn shift_after_remove(pos: usize, start: usize, end: usize) -> usize {
    if pos >= end {
        pos - (end - start)
    } else if pos > start {
        start
    } else {
        pos
    }
}

impl DisplaySurface for TextSurface {
    fn insert_text(&mut self, position: usize, text: &str, style: &StyleToken) -> Result<()> {
        self.check_range(position, position)?;
        if text.is_empty() {
            return Ok(());
        }
        let inserted: Vec<Cell> = text
            .chars()
            .map(|ch| Cell {
                ch,
                style: style.clone(),
            })
            .collect();
        let count = inserted.len();
        self.cells.splice(position..position, inserted);

        if self.caret >= position {
            self.caret += count;
        }
        if let Some((start, end)) = self.selection.as_mut() {
            if *start >= position {
                *start += count;
            }
            if *end >= position {
                *end += count;
            }
        }
        Ok(())
    }

    fn remove_range(&mut self, start: usize, end: usize) -> Result<()> {
        self.check_range(start, end)?;
        if start == end {
            return Ok(());
        }
        self.cells.drain(start..end);
        self.caret = shift_after_remove(self.caret, start, end);
        self.selection = self.selection.and_then(|(lo, hi)| {
            let lo = shift_after_remove(lo, start, end);
            let hi = shift_after_remove(hi, start, end);
            (lo < hi).then_some((lo, hi))
        });
        Ok(())
    }

    fn text_range(&self, start: usize, end: usize) -> Result<String> {
        self.check_range(start, end)?;
        Ok(self.cells[start..end].iter().map(|cell| cell.ch).collect())
    }

    fn caret_position(&self) -> usize {
        self.caret
    }

    fn set_caret_position(&mut self, position: usize) -> Result<()> {
        self.check_range(position, position)?;
        self.caret = position;
        Ok(())
    }

    fn document_length(&self) -> usize {
        self.cells.len()
    }

    fn is_scrolled_to_bottom(&self) -> bool {
        self.pinned
    }

    fn set_viewport_to_bottom(&mut self) {
        self.pinned = true;
    }

    fn column_at(&self, position: usize) -> usize {
        let position = position.min(self.cells.len());
        self.cells[..position]
            .iter()
            .rev()
            .take_while(|cell| cell.ch != '\n')
            .map(|cell| cell.ch.width().unwrap_or(0))
            .sum()
    }

    fn line_count(&self) -> usize {
        1 + self.cells.iter().filter(|cell| cell.ch == '\n').count()
    }

    fn line_start_offset(&self, line: usize) -> Option<usize> {
        if line == 0 {
            return Some(0);
        }
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, cell)| cell.ch == '\n')
            .nth(line - 1)
            .map(|(idx, _)| idx + 1)
    }

    fn selection(&self) -> Option<(usize, usize)> {
        self.selection
    }

    fn set_editable(&mut self, editable: bool) {
        self.editable = editable;
    }

    fn beep(&mut self) {
        self.beeps += 1;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> StyleToken {
        StyleToken::named("plain")
    }

    #[test]
    fn insert_and_remove_track_caret_and_selection() {
        let style = plain();
        let mut surface = TextSurface::new();
        surface.insert_text(0, "hello world", &style).unwrap();
        surface.set_caret_position(8).unwrap();
        surface.set_selection(6, 11);

        surface.remove_range(0, 6).unwrap();
        assert_eq!(surface.text(), "world");
        assert_eq!(surface.caret_position(), 2);
        assert_eq!(surface.selection(), Some((0, 5)));

        surface.insert_text(0, ">> ", &style).unwrap();
        assert_eq!(surface.caret_position(), 5);
        assert_eq!(surface.selection(), Some((3, 8)));
    }

    #[test]
    fn removing_a_selection_entirely_clears_it() {
        let style = plain();
        let mut surface = TextSurface::new();
        surface.insert_text(0, "abcdef", &style).unwrap();
        surface.set_selection(1, 3);
        surface.remove_range(0, 4).unwrap();
        assert_eq!(surface.selection(), None);
    }

    #[test]
    fn out_of_range_mutations_are_render_errors() {
        let mut surface = TextSurface::new();
        let err = surface.insert_text(3, "x", &plain()).unwrap_err();
        assert!(matches!(err, ConsoleError::Render(_)));
        assert!(surface.remove_range(0, 1).is_err());
        assert!(surface.set_caret_position(1).is_err());
    }

    #[test]
    fn line_geometry() {
        let mut surface = TextSurface::new();
        surface.insert_text(0, "one\ntwo\n漢字", &plain()).unwrap();
        assert_eq!(surface.line_count(), 3);
        assert_eq!(surface.line_start_offset(1), Some(4));
        assert_eq!(surface.line_start_offset(2), Some(8));
        assert_eq!(surface.line_start_offset(3), None);
        assert_eq!(surface.column_at(surface.document_length()), 4);
        assert_eq!(surface.column_at(8), 0);
    }

    #[test]
    fn style_filtering_uses_identity() {
        let a = StyleToken::named("same");
        let b = StyleToken::named("same");
        let mut surface = TextSurface::new();
        surface.insert_text(0, "aa", &a).unwrap();
        surface.insert_text(2, "bb", &b).unwrap();
        assert_eq!(surface.text_with_style(&a), "aa");
        assert_eq!(surface.text_with_style(&b), "bb");
    }
}
