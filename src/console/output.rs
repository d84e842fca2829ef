use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::error::{ConsoleError, Result};
use crate::logging::{LogLevel, json_str};
use crate::style::StyleToken;

use super::{Console, OUTPUT_TARGET};

static NEXT_SOURCE: AtomicU64 = AtomicU64::new(1);

/// Looks a console up by name, creating it when absent. Unbound aggregators
/// use this to find (or re-find) their target.
pub trait ConsoleResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<Console>;
}

/// Bytes from one writer in one style, awaiting the next flush.
#[derive(Debug, Clone)]
pub struct OutputRun {
    pub(crate) source: u64,
    pub(crate) style: StyleToken,
    pub(crate) bytes: Vec<u8>,
}

impl OutputRun {
    pub fn source(&self) -> u64 {
        self.source
    }

    pub fn style(&self) -> &StyleToken {
        &self.style
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Output accepted from writers but not yet rendered.
#[derive(Debug, Default)]
pub(crate) struct PendingOutput {
    runs: Vec<OutputRun>,
    /// Trailing bytes of an unfinished UTF-8 sequence, per writer.
    partial: HashMap<u64, Vec<u8>>,
    closed: bool,
}

impl PendingOutput {
    /// Append `bytes`, merging into the last run when both the writer and the
    /// style token match. An unfinished UTF-8 sequence at the end is held back
    /// until the same writer completes it. Returns whether a run was added to
    /// an empty list.
    pub(crate) fn push(&mut self, source: u64, style: &StyleToken, bytes: &[u8]) -> Result<bool> {
        if self.closed {
            return Err(ConsoleError::Closed);
        }
        let mut data = self.partial.remove(&source).unwrap_or_default();
        data.extend_from_slice(bytes);
        let complete = data.len() - incomplete_tail(&data);
        if complete < data.len() {
            self.partial.insert(source, data.split_off(complete));
        }
        if data.is_empty() {
            return Ok(false);
        }

        let was_empty = self.runs.is_empty();
        match self.runs.last_mut() {
            Some(last) if last.source == source && last.style.same(style) => {
                last.bytes.extend_from_slice(&data);
            }
            _ => self.runs.push(OutputRun {
                source,
                style: style.clone(),
                bytes: data,
            }),
        }
        Ok(was_empty)
    }

    pub(crate) fn take(&mut self) -> Vec<OutputRun> {
        std::mem::take(&mut self.runs)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
        self.runs.clear();
        self.partial.clear();
    }
}

/// Length of an unfinished UTF-8 sequence at the end of `bytes`. Invalid bytes
/// are not held back.
fn incomplete_tail(bytes: &[u8]) -> usize {
    let floor = bytes.len().saturating_sub(3);
    for start in (floor..bytes.len()).rev() {
        if bytes[start] & 0xC0 != 0x80 {
            return match std::str::from_utf8(&bytes[start..]) {
                Err(err) if err.error_len().is_none() => bytes.len() - start,
                _ => 0,
            };
        }
    }
    0
}

pub(crate) struct AggregatorShared {
    id: u64,
    name: String,
    style: Option<StyleToken>,
    auto_show: AtomicBool,
    target: Mutex<Option<Console>>,
    resolver: Option<Weak<dyn ConsoleResolver>>,
    closed: AtomicBool,
}

impl AggregatorShared {
    /// Drop the binding to `console` if it is still the current target.
    pub(crate) fn detach(&self, console: &Console) {
        if let Ok(mut target) = self.target.lock() {
            if target.as_ref().is_some_and(|current| current == console) {
                *target = None;
            }
        }
    }
}

/// A writable byte sink feeding one console.
///
/// Cloning shares the writer identity, so clones coalesce with each other.
/// Every call returns once the bytes are queued; rendering happens later on
/// the display thread.
#[derive(Clone)]
pub struct OutputAggregator {
    shared: Arc<AggregatorShared>,
}

impl OutputAggregator {
    pub(crate) fn bound(console: &Console, style: Option<StyleToken>, auto_show: bool) -> Self {
        Self::build(
            console.name().to_string(),
            style,
            auto_show,
            Some(console.clone()),
            None,
        )
    }

    /// An aggregator that finds its console through `resolver` on first write,
    /// and again whenever the bound console has been closed.
    pub(crate) fn resolving(
        name: &str,
        style: Option<StyleToken>,
        auto_show: bool,
        resolver: Weak<dyn ConsoleResolver>,
    ) -> Self {
        Self::build(name.to_string(), style, auto_show, None, Some(resolver))
    }

    fn build(
        name: String,
        style: Option<StyleToken>,
        auto_show: bool,
        target: Option<Console>,
        resolver: Option<Weak<dyn ConsoleResolver>>,
    ) -> Self {
        Self {
            shared: Arc::new(AggregatorShared {
                id: NEXT_SOURCE.fetch_add(1, Ordering::Relaxed),
                name,
                style,
                auto_show: AtomicBool::new(auto_show),
                target: Mutex::new(target),
                resolver,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<AggregatorShared> {
        Arc::downgrade(&self.shared)
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn console_name(&self) -> &str {
        &self.shared.name
    }

    pub fn set_auto_show(&self, auto_show: bool) {
        self.shared.auto_show.store(auto_show, Ordering::Relaxed);
    }

    pub fn auto_show(&self) -> bool {
        self.shared.auto_show.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// The console currently bound, if any.
    pub fn console(&self) -> Option<Console> {
        self.shared.target.lock().ok().and_then(|target| target.clone())
    }

    /// Queue `bytes` in this aggregator's style, or the console's default
    /// output style when none was given.
    pub fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        self.write_with(bytes, None)
    }

    pub fn write_styled(&self, bytes: &[u8], style: &StyleToken) -> Result<()> {
        self.write_with(bytes, Some(style))
    }

    pub fn write_str(&self, text: &str) -> Result<()> {
        self.write_bytes(text.as_bytes())
    }

    /// Detach from the console. Later writes fail with `Closed`.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut target) = self.shared.target.lock() {
            *target = None;
        }
    }

    fn write_with(&self, bytes: &[u8], style: Option<&StyleToken>) -> Result<()> {
        if self.is_closed() {
            return Err(ConsoleError::Closed);
        }
        match self.try_write(bytes, style) {
            Err(ConsoleError::Closed) => {
                if self.rebind()? {
                    self.try_write(bytes, style)
                } else {
                    Err(ConsoleError::Closed)
                }
            }
            other => other,
        }
    }

    fn try_write(&self, bytes: &[u8], style: Option<&StyleToken>) -> Result<()> {
        let Some(console) = self.console() else {
            return Err(ConsoleError::Closed);
        };
        let style = style
            .or(self.shared.style.as_ref())
            .cloned()
            .unwrap_or_else(|| console.default_style().clone());
        console.write_output(self.shared.id, bytes, &style, self.auto_show())
    }

    fn rebind(&self) -> Result<bool> {
        let Some(resolver) = self.shared.resolver.as_ref().and_then(Weak::upgrade) else {
            return Ok(false);
        };
        let console = resolver.resolve(&self.shared.name)?;
        console.register_aggregator(self)?;
        if let Ok(mut target) = self.shared.target.lock() {
            *target = Some(console.clone());
        }
        console.log(
            LogLevel::Debug,
            OUTPUT_TARGET,
            "aggregator_bound",
            [json_str("aggregator", self.shared.id.to_string())],
        );
        Ok(true)
    }
}

impl io::Write for OutputAggregator {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for OutputAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputAggregator")
            .field("id", &self.shared.id)
            .field("console", &self.shared.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}
