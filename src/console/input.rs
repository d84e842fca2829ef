use std::io;

use crate::error::Result;

use super::Console;

/// The program's blocking view of what the user typed.
///
/// Each accepted line arrives with its trailing `\n`. Reads block while the
/// queue is empty and request a prompt on the display thread the first time
/// they do so. After [`InputChannel::close`] or console disposal every read
/// reports end of stream, even if part of a line was still buffered.
pub struct InputChannel {
    console: Console,
    buffer: Vec<u8>,
    pos: usize,
}

impl InputChannel {
    pub(crate) fn new(console: Console) -> Self {
        Self {
            console,
            buffer: Vec::new(),
            pos: 0,
        }
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    /// Next byte, or `None` at end of stream.
    pub fn read_byte(&mut self) -> Result<Option<u8>> {
        if !self.ensure_buffered()? {
            return Ok(None);
        }
        let byte = self.buffer[self.pos];
        self.pos += 1;
        Ok(Some(byte))
    }

    /// Fill `buf` from the current line. Blocks only until at least one byte is
    /// available; returns 0 at end of stream.
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || !self.ensure_buffered()? {
            return Ok(0);
        }
        let available = &self.buffer[self.pos..];
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.pos += count;
        Ok(count)
    }

    /// The rest of the current line without its terminator, or `None` at end of
    /// stream.
    pub fn read_line(&mut self) -> Result<Option<String>> {
        let mut bytes = Vec::new();
        while let Some(byte) = self.read_byte()? {
            if byte == b'\n' {
                return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()));
            }
            bytes.push(byte);
        }
        if bytes.is_empty() {
            Ok(None)
        } else {
            Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
        }
    }

    /// Prompt used for every read until changed.
    pub fn set_prompt(&self, prompt: impl Into<String>) -> Result<()> {
        self.console.update_prompt(|prompt_state| prompt_state.permanent = prompt.into())
    }

    /// Prompt used for the next accepted line only.
    pub fn set_one_time_prompt(&self, prompt: impl Into<String>) -> Result<()> {
        self.console
            .update_prompt(|prompt_state| prompt_state.one_time = Some(prompt.into()))
    }

    /// Text pre-filled into the editable region at the next prompt.
    pub fn set_initial_entry(&self, entry: impl Into<String>) -> Result<()> {
        self.console
            .update_prompt(|prompt_state| prompt_state.initial_entry = Some(entry.into()))
    }

    /// Wake a blocked read with `Interrupted`. One-shot: a read that was not
    /// blocked picks it up the next time it would wait.
    pub fn interrupt(&self) -> Result<()> {
        self.console.interrupt_reader()
    }

    /// Close the input side. Idempotent; output keeps working.
    pub fn close(&mut self) {
        self.buffer.clear();
        self.pos = 0;
        self.console.close_input();
    }

    pub fn is_closed(&self) -> bool {
        self.console.input_closed()
    }

    fn ensure_buffered(&mut self) -> Result<bool> {
        if self.console.input_closed() {
            self.buffer.clear();
            self.pos = 0;
            return Ok(false);
        }
        if self.pos < self.buffer.len() {
            return Ok(true);
        }
        match self.console.next_line()? {
            Some(line) => {
                self.buffer = line.into_bytes();
                self.pos = 0;
                Ok(!self.buffer.is_empty())
            }
            None => Ok(false),
        }
    }
}

impl io::Read for InputChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_into(buf)?)
    }
}

impl std::fmt::Debug for InputChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputChannel")
            .field("console", &self.console.name())
            .field("buffered", &(self.buffer.len() - self.pos.min(self.buffer.len())))
            .finish()
    }
}
