//! Style tokens attached to output runs and display text.
//!
//! A [`StyleToken`] is an opaque handle compared by identity: two tokens are
//! equal only when they were cloned from the same [`StyleToken::new`] call,
//! even if their attributes happen to match. Output coalescing relies on this.

use std::fmt;
use std::sync::Arc;

use crossterm::style::Color;

/// Visual attributes carried by a token.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StyleSpec {
    pub name: String,
    pub foreground: Option<Color>,
    pub bold: bool,
}

impl StyleSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_foreground(mut self, color: Color) -> Self {
        self.foreground = Some(color);
        self
    }

    pub fn bold(mut self) -> Self {
        self.bold = true;
        self
    }
}

#[derive(Clone)]
pub struct StyleToken(Arc<StyleSpec>);

impl StyleToken {
    pub fn new(spec: StyleSpec) -> Self {
        Self(Arc::new(spec))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::new(StyleSpec::named(name))
    }

    pub fn spec(&self) -> &StyleSpec {
        &self.0
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn same(&self, other: &StyleToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for StyleToken {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for StyleToken {}

impl fmt::Debug for StyleToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StyleToken").field(&self.0.name).finish()
    }
}

pub(crate) fn default_prompt_color() -> Color {
    Color::Rgb { r: 0, g: 153, b: 51 }
}
