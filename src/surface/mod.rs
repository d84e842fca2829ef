//! The display surface the console drives.
//!
//! Positions are character offsets into the document. Every method is called
//! from the display thread only; the console never shares a surface across
//! threads without its own lock.

use std::any::Any;

use crate::error::Result;
use crate::style::StyleToken;

mod text;

pub use text::TextSurface;

/// Notifications the host forwards from its widget to the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    Resized { width: u16, height: u16 },
    Shown,
    Hidden,
}

pub trait DisplaySurface: Send {
    fn insert_text(&mut self, position: usize, text: &str, style: &StyleToken) -> Result<()>;

    /// Remove `[start, end)`. Caret and selection positions past the range shift
    /// back; positions inside it collapse to `start`.
    fn remove_range(&mut self, start: usize, end: usize) -> Result<()>;

    fn text_range(&self, start: usize, end: usize) -> Result<String>;

    fn caret_position(&self) -> usize;

    fn set_caret_position(&mut self, position: usize) -> Result<()>;

    fn document_length(&self) -> usize;

    fn is_scrolled_to_bottom(&self) -> bool;

    fn set_viewport_to_bottom(&mut self);

    /// Display column of `position` within its line.
    fn column_at(&self, position: usize) -> usize;

    /// Number of lines, counting a trailing empty line after a final newline.
    fn line_count(&self) -> usize;

    fn line_start_offset(&self, line: usize) -> Option<usize>;

    fn selection(&self) -> Option<(usize, usize)> {
        None
    }

    fn set_editable(&mut self, _editable: bool) {}

    fn beep(&mut self) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
