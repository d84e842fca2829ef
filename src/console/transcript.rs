use std::io::Write;

/// Optional byte copy of everything the console renders and accepts.
#[derive(Default)]
pub(crate) struct Transcript {
    sink: Option<Box<dyn Write + Send>>,
    enabled: bool,
}

impl Transcript {
    pub(crate) fn set_sink(&mut self, sink: Option<Box<dyn Write + Send>>) {
        if let Some(previous) = self.sink.as_mut() {
            let _ = previous.flush();
        }
        self.enabled = sink.is_some();
        self.sink = sink;
    }

    /// Temporarily pause or resume; has no effect without a sink.
    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled && self.sink.is_some();
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn record_output(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self.active() {
            Some(sink) => sink.write_all(bytes),
            None => Ok(()),
        }
    }

    pub(crate) fn record_line(&mut self, prompt: &str, line: &str) -> std::io::Result<()> {
        match self.active() {
            Some(sink) => {
                writeln!(sink, "{prompt}{line}")?;
                sink.flush()
            }
            None => Ok(()),
        }
    }

    fn active(&mut self) -> Option<&mut Box<dyn Write + Send>> {
        if !self.enabled {
            return None;
        }
        self.sink.as_mut()
    }
}
