use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

/// Line-editing mode of a console's input side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InputMode {
    /// The program is computing; keystrokes go to type-ahead.
    Busy,
    /// A prompt is live. `line_start` is where the prompt line begins and
    /// `editable_start` is the boundary the caret may not cross.
    WaitingForInput {
        line_start: usize,
        editable_start: usize,
    },
    Closed,
}

impl InputMode {
    pub(crate) fn is_waiting(&self) -> bool {
        matches!(self, InputMode::WaitingForInput { .. })
    }

    /// Account for `evicted` characters removed from the front of the display.
    pub(crate) fn shift(&mut self, evicted: usize) {
        if let InputMode::WaitingForInput {
            line_start,
            editable_start,
        } = self
        {
            *line_start = line_start.saturating_sub(evicted);
            *editable_start = editable_start.saturating_sub(evicted);
        }
    }

    pub(crate) fn state(&self) -> StreamState {
        match self {
            InputMode::Busy => StreamState::Busy,
            InputMode::WaitingForInput { .. } => StreamState::WaitingForInput,
            InputMode::Closed => StreamState::Closed,
        }
    }
}

/// Externally observable state of a console's input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    WaitingForInput,
    Busy,
    Closed,
}

/// Result of feeding one key to the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    Consumed,
    /// Refused with a beep; nothing changed.
    Rejected,
    Ignored,
}

/// The editing keys the console understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKey {
    Char(char),
    Enter,
    Backspace,
    Delete,
    Left,
    Right,
    Home,
    End,
    Up,
    Down,
    Interrupt,
}

impl EditKey {
    pub fn from_key_event(key: &KeyEvent) -> Option<Self> {
        if key.kind != KeyEventKind::Press {
            return None;
        }
        let control = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('c') | KeyCode::Char('C') if control => Some(EditKey::Interrupt),
            KeyCode::Char(_) if control || key.modifiers.contains(KeyModifiers::ALT) => None,
            KeyCode::Char(ch) => Some(EditKey::Char(ch)),
            KeyCode::Enter => Some(EditKey::Enter),
            KeyCode::Backspace => Some(EditKey::Backspace),
            KeyCode::Delete => Some(EditKey::Delete),
            KeyCode::Left => Some(EditKey::Left),
            KeyCode::Right => Some(EditKey::Right),
            KeyCode::Home => Some(EditKey::Home),
            KeyCode::End => Some(EditKey::End),
            KeyCode::Up => Some(EditKey::Up),
            KeyCode::Down => Some(EditKey::Down),
            _ => None,
        }
    }
}

/// Input the user supplied before the console was ready for it.
///
/// `type_ahead` holds the line being typed while busy; `paste_ahead` holds
/// whole (and possibly one trailing partial) lines that are replayed, in
/// order, each time a prompt is issued.
#[derive(Debug, Default)]
pub struct EditBuffer {
    pub(crate) type_ahead: String,
    pub(crate) paste_ahead: String,
}

impl EditBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn type_ahead(&self) -> &str {
        &self.type_ahead
    }

    pub fn paste_ahead(&self) -> &str {
        &self.paste_ahead
    }

    /// Apply a key typed while the console is busy.
    pub fn type_key(&mut self, key: EditKey) -> KeyOutcome {
        match key {
            EditKey::Char(ch) => {
                self.type_ahead.push(ch);
                KeyOutcome::Consumed
            }
            EditKey::Enter => {
                self.paste_ahead.push_str(&self.type_ahead);
                self.paste_ahead.push('\n');
                self.type_ahead.clear();
                KeyOutcome::Consumed
            }
            EditKey::Backspace => {
                self.type_ahead.pop();
                KeyOutcome::Consumed
            }
            _ => KeyOutcome::Ignored,
        }
    }

    /// Remove and return the first complete line of paste-ahead, without its
    /// terminator.
    pub fn take_paste_line(&mut self) -> Option<String> {
        let pos = self.paste_ahead.find('\n')?;
        let line = self.paste_ahead[..pos].to_string();
        self.paste_ahead.drain(..=pos);
        Some(line)
    }

    pub fn take_paste_ahead(&mut self) -> String {
        std::mem::take(&mut self.paste_ahead)
    }

    pub fn take_type_ahead(&mut self) -> String {
        std::mem::take(&mut self.type_ahead)
    }

    pub fn clear(&mut self) {
        self.type_ahead.clear();
        self.paste_ahead.clear();
    }
}
