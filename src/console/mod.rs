//! The console: one display surface shared by a blocking input channel and any
//! number of output aggregators.
//!
//! Three locks guard a console. The surface lock is only taken on the display
//! thread and is always taken first. The input lock (paired with a condition
//! variable for blocked readers) and the output lock are each taken after it,
//! and never both at once. Writers only ever touch the output lock, so a write
//! never waits on the display thread.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};

use serde_json::Value;

use crate::config::ConsoleConfig;
use crate::error::{ConsoleError, Result};
use crate::logging::{LogLevel, Logger, emit, json_kv, json_str};
use crate::metrics;
use crate::runtime::Scheduler;
use crate::style::{StyleSpec, StyleToken};
use crate::surface::{DisplaySurface, SurfaceEvent};

mod edit;
mod history;
mod input;
mod output;
mod queue;
mod transcript;

pub use edit::{EditBuffer, EditKey, KeyOutcome, StreamState};
pub use history::History;
pub use input::InputChannel;
pub use output::{ConsoleResolver, OutputAggregator, OutputRun};
pub use queue::LineQueue;

use edit::InputMode;
use output::{AggregatorShared, PendingOutput};
use transcript::Transcript;

pub(crate) const OUTPUT_TARGET: &str = "console::output";
pub(crate) const INPUT_TARGET: &str = "console::input";

pub type InterruptListener = Arc<dyn Fn() + Send + Sync>;
pub(crate) type ShowHook = Arc<dyn Fn(&Console) + Send + Sync>;

#[derive(Debug, Default)]
pub(crate) struct PromptState {
    pub(crate) permanent: String,
    pub(crate) one_time: Option<String>,
    pub(crate) initial_entry: Option<String>,
    /// The prompt text currently (or most recently) on screen.
    displayed: Option<String>,
}

impl PromptState {
    fn current(&self) -> &str {
        self.one_time.as_deref().unwrap_or(&self.permanent)
    }
}

struct InputState {
    queue: LineQueue,
    edit: EditBuffer,
    mode: InputMode,
    history: History,
    prompt: PromptState,
    /// Set by a reader when it first blocks; cleared when the prompt renders.
    prompt_requested: bool,
    interrupt_pending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptKind {
    /// A reader asked for input.
    Fresh,
    /// The live prompt is being redrawn after output or a clear.
    Redisplay,
}

struct ConsoleCore {
    name: String,
    config: ConsoleConfig,
    scheduler: Arc<dyn Scheduler>,
    surface: Mutex<Box<dyn DisplaySurface>>,
    input: Mutex<InputState>,
    input_ready: Condvar,
    output: Mutex<PendingOutput>,
    aggregators: Mutex<Vec<Weak<AggregatorShared>>>,
    transcript: Mutex<Transcript>,
    default_style: StyleToken,
    prompt_style: StyleToken,
    interrupt_listeners: Mutex<Vec<(u64, InterruptListener)>>,
    next_listener: AtomicU64,
    show_hook: Mutex<Option<ShowHook>>,
    visible: AtomicBool,
    disposed: AtomicBool,
}

/// Handle to a console. Clones share the same console.
#[derive(Clone)]
pub struct Console {
    core: Arc<ConsoleCore>,
}

impl Console {
    pub fn new(
        name: impl Into<String>,
        config: ConsoleConfig,
        scheduler: Arc<dyn Scheduler>,
        surface: Box<dyn DisplaySurface>,
    ) -> Self {
        let prompt_style =
            StyleToken::new(StyleSpec::named("prompt").with_foreground(config.prompt_color));
        let input = InputState {
            queue: LineQueue::new(),
            edit: EditBuffer::new(),
            mode: InputMode::Busy,
            history: History::new(config.max_history),
            prompt: PromptState {
                permanent: config.default_prompt.clone(),
                ..PromptState::default()
            },
            prompt_requested: false,
            interrupt_pending: false,
        };
        let console = Self {
            core: Arc::new(ConsoleCore {
                name: name.into(),
                config,
                scheduler,
                surface: Mutex::new(surface),
                input: Mutex::new(input),
                input_ready: Condvar::new(),
                output: Mutex::new(PendingOutput::default()),
                aggregators: Mutex::new(Vec::new()),
                transcript: Mutex::new(Transcript::default()),
                default_style: StyleToken::named("output"),
                prompt_style,
                interrupt_listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                show_hook: Mutex::new(None),
                visible: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
            }),
        };
        console.log(LogLevel::Info, OUTPUT_TARGET, "console_created", std::iter::empty());
        console
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.core.config
    }

    pub fn default_style(&self) -> &StyleToken {
        &self.core.default_style
    }

    pub fn prompt_style(&self) -> &StyleToken {
        &self.core.prompt_style
    }

    pub fn state(&self) -> StreamState {
        self.core
            .lock_input()
            .map(|state| state.mode.state())
            .unwrap_or(StreamState::Closed)
    }

    pub fn is_disposed(&self) -> bool {
        self.core.disposed.load(Ordering::Acquire)
    }

    pub fn is_visible(&self) -> bool {
        self.core.visible.load(Ordering::Acquire)
    }

    /// Accepted lines available for recall, oldest first.
    pub fn history(&self) -> Vec<String> {
        self.core
            .lock_input()
            .map(|state| state.history.entries().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Open a reader on this console, optionally replacing the permanent
    /// prompt. Every channel drains the same line queue.
    pub fn input_channel(&self, prompt: Option<&str>) -> Result<InputChannel> {
        if self.is_disposed() {
            return Err(ConsoleError::Closed);
        }
        if let Some(prompt) = prompt {
            self.update_prompt(|state| state.permanent = prompt.to_string())?;
        }
        Ok(InputChannel::new(self.clone()))
    }

    /// A new writer bound to this console. `style` defaults to the console's
    /// output style; `auto_show` asks the host to reveal the console on write.
    pub fn output_aggregator(
        &self,
        style: Option<StyleToken>,
        auto_show: bool,
    ) -> Result<OutputAggregator> {
        let aggregator = OutputAggregator::bound(self, style, auto_show);
        self.register_aggregator(&aggregator)?;
        Ok(aggregator)
    }

    /// Copy everything rendered and accepted to `sink`; `None` stops copying.
    pub fn set_transcript(&self, sink: Option<Box<dyn Write + Send>>) -> Result<()> {
        let mut transcript = self
            .core
            .transcript
            .lock()
            .map_err(|_| ConsoleError::Poisoned)?;
        transcript.set_sink(sink);
        Ok(())
    }

    pub fn set_transcript_enabled(&self, enabled: bool) -> Result<()> {
        let mut transcript = self
            .core
            .transcript
            .lock()
            .map_err(|_| ConsoleError::Poisoned)?;
        transcript.set_enabled(enabled);
        Ok(())
    }

    pub fn transcript_enabled(&self) -> bool {
        self.core
            .transcript
            .lock()
            .map(|transcript| transcript.is_enabled())
            .unwrap_or(false)
    }

    /// Register a Ctrl+C handler. Returns an id for removal.
    pub fn add_interrupt_listener<F>(&self, listener: F) -> u64
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.core.next_listener.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.core.interrupt_listeners.lock() {
            listeners.push((id, Arc::new(listener)));
        }
        id
    }

    pub fn remove_interrupt_listener(&self, id: u64) -> bool {
        match self.core.interrupt_listeners.lock() {
            Ok(mut listeners) => {
                let before = listeners.len();
                listeners.retain(|(existing, _)| *existing != id);
                listeners.len() != before
            }
            Err(_) => false,
        }
    }

    pub(crate) fn set_show_hook(&self, hook: ShowHook) {
        if let Ok(mut slot) = self.core.show_hook.lock() {
            *slot = Some(hook);
        }
    }

    /// Ask the host to reveal this console unless it is already visible.
    pub fn request_show(&self) {
        if self.is_visible() {
            return;
        }
        let hook = self
            .core
            .show_hook
            .lock()
            .ok()
            .and_then(|slot| slot.clone());
        if let Some(hook) = hook {
            hook(self);
        }
    }

    /// Run `f` against the surface. Display thread only.
    pub fn with_surface<R>(&self, f: impl FnOnce(&mut dyn DisplaySurface) -> R) -> Result<R> {
        let mut surface = self.core.lock_surface()?;
        Ok(f(&mut **surface))
    }

    /// Feed a key event from the host. Display thread only.
    pub fn handle_key(&self, key: &crossterm::event::KeyEvent) -> Result<KeyOutcome> {
        match EditKey::from_key_event(key) {
            Some(edit_key) => self.apply_key(edit_key),
            None => Ok(KeyOutcome::Ignored),
        }
    }

    /// Apply one editing key. Display thread only.
    pub fn apply_key(&self, key: EditKey) -> Result<KeyOutcome> {
        if key == EditKey::Interrupt {
            self.fire_interrupt();
            return Ok(KeyOutcome::Consumed);
        }
        let mut surface = self.core.lock_surface()?;
        let surface: &mut dyn DisplaySurface = &mut **surface;
        let mut state = self.core.lock_input()?;
        let mode = state.mode;
        let outcome = match mode {
            InputMode::Closed => KeyOutcome::Ignored,
            InputMode::Busy => state.edit.type_key(key),
            InputMode::WaitingForInput { .. } => self.core.edit_live(surface, &mut state, key)?,
        };
        if outcome == KeyOutcome::Rejected {
            surface.beep();
            metrics::record(self.core.config.metrics.as_ref(), |m| m.record_beep());
        }
        Ok(outcome)
    }

    /// Queue a key event for the display thread.
    pub fn post_key(&self, key: crossterm::event::KeyEvent) {
        self.post_to_display(move |console| console.handle_key(&key).map(|_| ()));
    }

    /// Insert `text` as if the user typed it, accepting each complete line in
    /// turn. A missing trailing newline is supplied.
    pub fn inject_text(&self, text: impl Into<String>) {
        let text = text.into();
        self.post_to_display(move |console| console.inject_now(&text));
    }

    /// Paste clipboard text into the editable region after stripping escape
    /// sequences and control characters.
    pub fn paste(&self, text: impl Into<String>) {
        let text = text.into();
        self.post_to_display(move |console| console.paste_now(&text));
    }

    /// Empty the display, keeping any in-progress input under a fresh prompt.
    pub fn clear(&self) {
        self.post_to_display(|console| console.clear_now());
    }

    /// Render pending output now, re-issuing the live prompt beneath it.
    /// Display thread only.
    pub fn flush_now(&self) -> Result<()> {
        let mut surface = self.core.lock_surface()?;
        self.core.refresh_output(&mut **surface)
    }

    pub fn surface_event(&self, event: SurfaceEvent) -> Result<()> {
        match event {
            SurfaceEvent::Resized { .. } => {
                let mut surface = self.core.lock_surface()?;
                if surface.is_scrolled_to_bottom() {
                    surface.set_viewport_to_bottom();
                }
            }
            SurfaceEvent::Shown => self.core.visible.store(true, Ordering::Release),
            SurfaceEvent::Hidden => self.core.visible.store(false, Ordering::Release),
        }
        self.log(
            LogLevel::Debug,
            OUTPUT_TARGET,
            "surface_event",
            [json_str("event", format!("{event:?}"))],
        );
        Ok(())
    }

    /// Close everything: blocked readers see end of stream, writers get
    /// `Closed`, the transcript stops. Idempotent.
    pub fn dispose(&self) {
        if self.core.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut transcript) = self.core.transcript.lock() {
            transcript.set_sink(None);
        }
        self.close_input();
        if let Ok(mut pending) = self.core.output.lock() {
            pending.close();
        }
        let aggregators = self
            .core
            .aggregators
            .lock()
            .map(|mut list| std::mem::take(&mut *list))
            .unwrap_or_default();
        for shared in aggregators.iter().filter_map(Weak::upgrade) {
            shared.detach(self);
        }
        if let Ok(mut listeners) = self.core.interrupt_listeners.lock() {
            listeners.clear();
        }
        self.log(LogLevel::Info, OUTPUT_TARGET, "console_disposed", std::iter::empty());
    }

    pub(crate) fn close_input(&self) {
        let newly_closed = match self.core.input.lock() {
            Ok(mut state) if !state.queue.is_closed() => {
                state.queue.close();
                state.edit.clear();
                state.mode = InputMode::Closed;
                state.prompt_requested = false;
                state.interrupt_pending = false;
                true
            }
            _ => false,
        };
        self.core.input_ready.notify_all();
        if newly_closed {
            self.post_to_display(|console| {
                console.with_surface(|surface| surface.set_editable(false))
            });
            self.log(LogLevel::Debug, INPUT_TARGET, "input_closed", std::iter::empty());
        }
    }

    pub(crate) fn input_closed(&self) -> bool {
        self.core
            .lock_input()
            .map(|state| state.queue.is_closed())
            .unwrap_or(true)
    }

    pub(crate) fn update_prompt(&self, update: impl FnOnce(&mut PromptState)) -> Result<()> {
        let mut state = self.core.lock_input()?;
        update(&mut state.prompt);
        Ok(())
    }

    pub(crate) fn interrupt_reader(&self) -> Result<()> {
        {
            let mut state = self.core.lock_input()?;
            state.interrupt_pending = true;
        }
        self.core.input_ready.notify_all();
        Ok(())
    }

    /// Block until a line is queued, requesting a prompt the first time the
    /// queue is found empty. `None` once input is closed.
    pub(crate) fn next_line(&self) -> Result<Option<String>> {
        let mut state = self.core.lock_input()?;
        loop {
            if state.queue.is_closed() {
                return Ok(None);
            }
            if let Some(line) = state.queue.pop() {
                return Ok(Some(line));
            }
            if state.interrupt_pending {
                state.interrupt_pending = false;
                return Err(ConsoleError::Interrupted);
            }
            if !state.prompt_requested {
                state.prompt_requested = true;
                self.schedule_prompt();
            }
            state = self
                .core
                .input_ready
                .wait(state)
                .map_err(|_| ConsoleError::Poisoned)?;
        }
    }

    pub(crate) fn write_output(
        &self,
        source: u64,
        bytes: &[u8],
        style: &StyleToken,
        requested_show: bool,
    ) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let schedule = {
            let mut pending = self
                .core
                .output
                .lock()
                .map_err(|_| ConsoleError::Poisoned)?;
            pending.push(source, style, bytes)?
        };
        metrics::record(self.core.config.metrics.as_ref(), |m| {
            m.record_write(bytes.len())
        });
        if schedule {
            self.schedule_flush();
        }
        if self.core.config.auto_show.should_show(requested_show) {
            self.request_show();
        }
        Ok(())
    }

    pub(crate) fn register_aggregator(&self, aggregator: &OutputAggregator) -> Result<()> {
        let mut list = self
            .core
            .aggregators
            .lock()
            .map_err(|_| ConsoleError::Poisoned)?;
        if self.is_disposed() {
            return Err(ConsoleError::Closed);
        }
        list.retain(|weak| weak.strong_count() > 0);
        list.push(aggregator.downgrade());
        Ok(())
    }

    pub(crate) fn log<I>(&self, level: LogLevel, target: &str, message: &str, fields: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        emit(
            self.logger(),
            level,
            target,
            message,
            std::iter::once(json_str("console", self.core.name.as_str())).chain(fields),
        );
    }

    fn logger(&self) -> Option<&Logger> {
        self.core.config.logger.as_ref()
    }

    fn schedule_flush(&self) {
        let core = Arc::downgrade(&self.core);
        self.core.scheduler.post_delayed(
            self.core.config.flush_delay,
            Box::new(move || match core.upgrade() {
                Some(core) => Console { core }.flush_now(),
                None => Ok(()),
            }),
        );
    }

    fn schedule_prompt(&self) {
        self.post_to_display(|console| console.show_prompt_now());
    }

    fn post_to_display<F>(&self, f: F)
    where
        F: FnOnce(&Console) -> Result<()> + Send + 'static,
    {
        let core = Arc::downgrade(&self.core);
        self.core.scheduler.post(Box::new(move || match core.upgrade() {
            Some(core) => f(&Console { core }),
            None => Ok(()),
        }));
    }

    fn show_prompt_now(&self) -> Result<()> {
        let mut surface = self.core.lock_surface()?;
        let surface: &mut dyn DisplaySurface = &mut **surface;
        let (already_waiting, paste_line_pending) = {
            let mut state = self.core.lock_input()?;
            state.prompt_requested = false;
            if state.mode == InputMode::Closed {
                return Ok(());
            }
            (state.mode.is_waiting(), state.edit.paste_ahead.contains('\n'))
        };
        if already_waiting && !paste_line_pending {
            return self.core.refresh_output(surface);
        }
        // A live backlog prompt gives way to the next pasted line.
        if let Some(line_start) = self.core.lift_editable_text(surface)? {
            let end = surface.document_length();
            surface.remove_range(line_start.min(end), end)?;
        }
        self.core.render_prompt(surface, PromptKind::Fresh)
    }

    fn inject_now(&self, text: &str) -> Result<()> {
        let mut text = text.to_string();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        let mut surface = self.core.lock_surface()?;
        let surface: &mut dyn DisplaySurface = &mut **surface;
        let mut state = self.core.lock_input()?;
        let mode = state.mode;
        match mode {
            InputMode::Closed => return Err(ConsoleError::Closed),
            InputMode::Busy => state.edit.paste_ahead.push_str(&text),
            InputMode::WaitingForInput { editable_start, .. } => {
                let split = text.find('\n').unwrap_or(text.len());
                let (first, rest) = text.split_at(split);
                let rest = rest.strip_prefix('\n').unwrap_or(rest);
                let end = surface.document_length();
                let typed = surface.text_range(editable_start, end)?;
                surface.remove_range(editable_start, end)?;
                surface.insert_text(editable_start, first, &self.core.default_style)?;
                let end = surface.document_length();
                let evicted = self.core.insert(surface, end, "\n", &self.core.default_style)?;
                state.mode.shift(evicted);
                let end = surface.document_length();
                surface.set_caret_position(end)?;
                self.core.accept_line(surface, &mut state, first.to_string());
                state.edit.paste_ahead.push_str(rest);
                state.edit.paste_ahead.push_str(&typed);
            }
        }
        self.log(
            LogLevel::Debug,
            INPUT_TARGET,
            "text_injected",
            [json_kv("bytes", text.len())],
        );
        Ok(())
    }

    fn paste_now(&self, raw: &str) -> Result<()> {
        let text = sanitize_paste(raw);
        if text.is_empty() {
            return Ok(());
        }
        let mut surface = self.core.lock_surface()?;
        let surface: &mut dyn DisplaySurface = &mut **surface;
        let mut state = self.core.lock_input()?;
        let InputMode::WaitingForInput { editable_start, .. } = state.mode else {
            if state.mode == InputMode::Closed {
                return Err(ConsoleError::Closed);
            }
            state.edit.paste_ahead.push_str(&text);
            return Ok(());
        };

        if let Some((lo, hi)) = surface.selection() {
            let (lo, hi) = (lo.max(editable_start), hi.max(editable_start));
            if hi > lo {
                surface.remove_range(lo, hi)?;
            }
        }
        let caret = surface.caret_position();
        let at = if caret >= editable_start {
            caret
        } else {
            surface.document_length()
        };
        match text.split_once('\n') {
            None => {
                surface.insert_text(at, &text, &self.core.default_style)?;
                surface.set_caret_position(at + text.chars().count())?;
            }
            Some((first, rest)) => {
                surface.insert_text(at, first, &self.core.default_style)?;
                let end = surface.document_length();
                let line = surface.text_range(editable_start, end)?;
                let evicted = self.core.insert(surface, end, "\n", &self.core.default_style)?;
                state.mode.shift(evicted);
                let end = surface.document_length();
                surface.set_caret_position(end)?;
                self.core.accept_line(surface, &mut state, line);
                state.edit.paste_ahead.push_str(rest);
            }
        }
        Ok(())
    }

    fn clear_now(&self) -> Result<()> {
        let mut surface = self.core.lock_surface()?;
        let surface: &mut dyn DisplaySurface = &mut **surface;
        let was_waiting = self.core.lift_editable_text(surface)?.is_some();
        let end = surface.document_length();
        surface.remove_range(0, end)?;
        if was_waiting {
            self.core.render_prompt(surface, PromptKind::Redisplay)?;
        }
        self.log(LogLevel::Debug, OUTPUT_TARGET, "console_cleared", std::iter::empty());
        Ok(())
    }

    fn fire_interrupt(&self) {
        let listeners: Vec<InterruptListener> = match self.core.interrupt_listeners.lock() {
            Ok(listeners) => listeners.iter().map(|(_, f)| Arc::clone(f)).collect(),
            Err(_) => return,
        };
        self.log(
            LogLevel::Info,
            INPUT_TARGET,
            "interrupt_requested",
            [json_kv("listeners", listeners.len())],
        );
        for listener in listeners {
            listener();
        }
    }
}

impl PartialEq for Console {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl Eq for Console {}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console")
            .field("name", &self.core.name)
            .field("state", &self.state())
            .finish()
    }
}

impl ConsoleCore {
    fn lock_surface(&self) -> Result<MutexGuard<'_, Box<dyn DisplaySurface>>> {
        self.surface.lock().map_err(|_| ConsoleError::Poisoned)
    }

    fn lock_input(&self) -> Result<MutexGuard<'_, InputState>> {
        self.input.lock().map_err(|_| ConsoleError::Poisoned)
    }

    fn log<I>(&self, level: LogLevel, target: &str, message: &str, fields: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        emit(
            self.config.logger.as_ref(),
            level,
            target,
            message,
            std::iter::once(json_str("console", self.name.as_str())).chain(fields),
        );
    }

    /// Insert and then enforce the scrollback cap. Returns how many characters
    /// were evicted from the front of the document.
    fn insert(
        &self,
        surface: &mut dyn DisplaySurface,
        position: usize,
        text: &str,
        style: &StyleToken,
    ) -> Result<usize> {
        surface.insert_text(position, text, style)?;
        self.enforce_scrollback(surface)
    }

    fn append(&self, surface: &mut dyn DisplaySurface, text: &str, style: &StyleToken) -> Result<usize> {
        let end = surface.document_length();
        self.insert(surface, end, text, style)
    }

    fn enforce_scrollback(&self, surface: &mut dyn DisplaySurface) -> Result<usize> {
        let lines = surface.line_count();
        let max = self.config.max_scrollback.max(1);
        if lines <= max {
            return Ok(0);
        }
        let Some(cut) = surface.line_start_offset(lines - max) else {
            return Ok(0);
        };
        surface.remove_range(0, cut)?;
        Ok(cut)
    }

    /// Render every pending run at the end of the document. Runs that fail to
    /// render are logged and dropped.
    fn flush(&self, surface: &mut dyn DisplaySurface) -> Result<()> {
        let runs = {
            let mut pending = self.output.lock().map_err(|_| ConsoleError::Poisoned)?;
            pending.take()
        };
        if runs.is_empty() {
            return Ok(());
        }
        let pinned = surface.is_scrolled_to_bottom();
        let count = runs.len();
        let mut evicted = 0;
        for run in &runs {
            match self.append(surface, &run.text(), &run.style) {
                Ok(removed) => {
                    evicted += removed;
                    self.record_transcript(run.bytes());
                }
                Err(err) => self.log(
                    LogLevel::Warn,
                    OUTPUT_TARGET,
                    "render_failed",
                    [json_str("error", err.to_string())],
                ),
            }
        }
        if evicted > 0 {
            let mut state = self.lock_input()?;
            state.mode.shift(evicted);
        }
        if pinned {
            surface.set_viewport_to_bottom();
        }
        metrics::record(self.config.metrics.as_ref(), |m| m.record_flush(count));
        Ok(())
    }

    fn record_transcript(&self, bytes: &[u8]) {
        let Ok(mut transcript) = self.transcript.lock() else {
            return;
        };
        if let Err(err) = transcript.record_output(bytes) {
            self.log(
                LogLevel::Warn,
                OUTPUT_TARGET,
                "transcript_failed",
                [json_str("error", err.to_string())],
            );
        }
    }

    /// Flush pending output. With a prompt live, the prompt line and its
    /// editable text are lifted off, the output rendered, and the prompt
    /// re-issued beneath it with the text restored.
    fn refresh_output(&self, surface: &mut dyn DisplaySurface) -> Result<()> {
        let has_pending = {
            let pending = self.output.lock().map_err(|_| ConsoleError::Poisoned)?;
            !pending.is_empty()
        };
        if !has_pending {
            return Ok(());
        }
        match self.lift_editable_text(surface)? {
            Some(line_start) => {
                let end = surface.document_length();
                surface.remove_range(line_start.min(end), end)?;
                self.render_prompt(surface, PromptKind::Redisplay)
            }
            None => self.flush(surface),
        }
    }

    /// If a prompt is live, move its editable text back into type-ahead and
    /// drop to busy. Returns where the prompt line started.
    fn lift_editable_text(&self, surface: &mut dyn DisplaySurface) -> Result<Option<usize>> {
        let mut state = self.lock_input()?;
        let InputMode::WaitingForInput {
            line_start,
            editable_start,
        } = state.mode
        else {
            return Ok(None);
        };
        let end = surface.document_length();
        let typed = surface.text_range(editable_start.min(end), end)?;
        state.edit.type_ahead.insert_str(0, &typed);
        state.mode = InputMode::Busy;
        surface.set_editable(false);
        Ok(Some(line_start))
    }

    /// Flush, then put a prompt on its own line and open the editable region.
    ///
    /// For a fresh prompt, a complete line waiting in paste-ahead is accepted
    /// on the spot instead, and the console stays busy until the reader asks
    /// again. A redisplay leaves paste-ahead for the next fresh prompt.
    fn render_prompt(&self, surface: &mut dyn DisplaySurface, kind: PromptKind) -> Result<()> {
        self.flush(surface)?;
        let mut state = self.lock_input()?;
        if state.mode == InputMode::Closed {
            return Ok(());
        }
        let pinned = surface.is_scrolled_to_bottom();
        let prompt = match kind {
            PromptKind::Redisplay => state.prompt.displayed.clone(),
            PromptKind::Fresh => None,
        }
        .unwrap_or_else(|| state.prompt.current().to_string());

        if surface.column_at(surface.document_length()) > 0 {
            self.append(surface, "\n", &self.default_style)?;
        }
        let mut line_start = surface.document_length();
        if !prompt.is_empty() {
            let evicted = self.append(surface, &prompt, &self.prompt_style)?;
            line_start = line_start.saturating_sub(evicted);
        }
        let mut editable_start = surface.document_length();
        state.prompt.displayed = Some(prompt);
        metrics::record(self.config.metrics.as_ref(), |m| m.record_prompt());

        let paste_line = match kind {
            PromptKind::Fresh => state.edit.take_paste_line(),
            PromptKind::Redisplay => None,
        };
        if let Some(line) = paste_line {
            self.append(surface, &line, &self.default_style)?;
            self.append(surface, "\n", &self.default_style)?;
            let end = surface.document_length();
            surface.set_caret_position(end)?;
            self.accept_line(surface, &mut state, line);
            return Ok(());
        }

        let mut restored = match kind {
            PromptKind::Fresh => state.edit.take_paste_ahead(),
            PromptKind::Redisplay => String::new(),
        };
        if restored.is_empty() && kind == PromptKind::Fresh {
            restored = state.prompt.initial_entry.take().unwrap_or_default();
        }
        restored.push_str(&state.edit.take_type_ahead());
        if !restored.is_empty() {
            let evicted = self.append(surface, &restored, &self.default_style)?;
            line_start = line_start.saturating_sub(evicted);
            editable_start = editable_start.saturating_sub(evicted);
        }

        let end = surface.document_length();
        surface.set_caret_position(end)?;
        surface.set_editable(true);
        if pinned {
            surface.set_viewport_to_bottom();
        }
        state.mode = InputMode::WaitingForInput {
            line_start,
            editable_start,
        };
        self.log(LogLevel::Debug, INPUT_TARGET, "prompt_shown", std::iter::empty());
        Ok(())
    }

    /// Hand a completed line to the reader. Wakes it on the empty-to-non-empty
    /// transition; otherwise the prompt stays live below the accepted line.
    fn accept_line(&self, surface: &mut dyn DisplaySurface, state: &mut InputState, line: String) {
        let prompt = state.prompt.displayed.clone().unwrap_or_default();
        if let Ok(mut transcript) = self.transcript.lock() {
            if let Err(err) = transcript.record_line(&prompt, &line) {
                self.log(
                    LogLevel::Warn,
                    INPUT_TARGET,
                    "transcript_failed",
                    [json_str("error", err.to_string())],
                );
            }
        }
        state.history.push(&line);
        state.prompt.one_time = None;
        let length = line.len();
        let was_empty = state.queue.push(format!("{line}\n"));
        if was_empty {
            if state.mode.is_waiting() {
                state.mode = InputMode::Busy;
                surface.set_editable(false);
            }
            self.input_ready.notify_one();
        } else if state.mode.is_waiting() {
            let end = surface.document_length();
            state.mode = InputMode::WaitingForInput {
                line_start: end,
                editable_start: end,
            };
        }
        metrics::record(self.config.metrics.as_ref(), |m| m.record_line());
        self.log(
            LogLevel::Debug,
            INPUT_TARGET,
            "line_accepted",
            [json_kv("bytes", length), json_kv("backlog", !was_empty)],
        );
    }

    fn edit_live(
        &self,
        surface: &mut dyn DisplaySurface,
        state: &mut InputState,
        key: EditKey,
    ) -> Result<KeyOutcome> {
        let InputMode::WaitingForInput { editable_start, .. } = state.mode else {
            return Ok(KeyOutcome::Ignored);
        };
        let caret = surface.caret_position();
        let end = surface.document_length();
        let in_region = caret >= editable_start;

        let outcome = match key {
            EditKey::Enter => {
                let line = surface.text_range(editable_start, end)?;
                let evicted = self.append(surface, "\n", &self.default_style)?;
                state.mode.shift(evicted);
                let end = surface.document_length();
                surface.set_caret_position(end)?;
                self.accept_line(surface, state, line);
                KeyOutcome::Consumed
            }
            EditKey::Char(ch) => {
                let at = if in_region { caret } else { end };
                let mut buf = [0u8; 4];
                surface.insert_text(at, ch.encode_utf8(&mut buf), &self.default_style)?;
                surface.set_caret_position(at + 1)?;
                KeyOutcome::Consumed
            }
            EditKey::Interrupt => KeyOutcome::Ignored,
            _ if !in_region => KeyOutcome::Ignored,
            EditKey::Backspace if caret > editable_start => {
                surface.remove_range(caret - 1, caret)?;
                KeyOutcome::Consumed
            }
            EditKey::Left if caret > editable_start => {
                surface.set_caret_position(caret - 1)?;
                KeyOutcome::Consumed
            }
            EditKey::Home if caret > editable_start => {
                surface.set_caret_position(editable_start)?;
                KeyOutcome::Consumed
            }
            EditKey::Backspace | EditKey::Left | EditKey::Home => KeyOutcome::Rejected,
            EditKey::Delete if caret < end => {
                surface.remove_range(caret, caret + 1)?;
                KeyOutcome::Consumed
            }
            EditKey::Right if caret < end => {
                surface.set_caret_position(caret + 1)?;
                KeyOutcome::Consumed
            }
            EditKey::Delete | EditKey::Right => KeyOutcome::Ignored,
            EditKey::End => {
                surface.set_caret_position(end)?;
                KeyOutcome::Consumed
            }
            EditKey::Up | EditKey::Down => {
                let recalled = if key == EditKey::Up {
                    state.history.previous()
                } else {
                    state.history.next()
                }
                .map(str::to_string);
                match recalled {
                    Some(entry) => {
                        surface.remove_range(editable_start, end)?;
                        surface.insert_text(editable_start, &entry, &self.default_style)?;
                        let end = surface.document_length();
                        surface.set_caret_position(end)?;
                        KeyOutcome::Consumed
                    }
                    None => KeyOutcome::Rejected,
                }
            }
        };
        Ok(outcome)
    }
}

/// Strip terminal escape sequences, then every control character except `\n`.
pub(crate) fn sanitize_paste(raw: &str) -> String {
    strip_ansi_escapes::strip_str(raw)
        .chars()
        .filter(|ch| *ch == '\n' || !ch.is_control())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutoShow;
    use crate::logging::MemorySink;
    use crate::runtime::ManualScheduler;
    use crate::surface::TextSurface;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    fn setup_with(config: ConsoleConfig) -> (Arc<ManualScheduler>, Console) {
        let scheduler = Arc::new(ManualScheduler::new());
        let console = Console::new(
            "test",
            config,
            scheduler.clone(),
            Box::new(TextSurface::new()),
        );
        (scheduler, console)
    }

    fn setup() -> (Arc<ManualScheduler>, Console) {
        setup_with(ConsoleConfig::default())
    }

    fn text(console: &Console) -> String {
        console
            .with_surface(|surface| {
                surface
                    .as_any()
                    .downcast_ref::<TextSurface>()
                    .map(TextSurface::text)
                    .unwrap_or_default()
            })
            .unwrap()
    }

    fn type_str(console: &Console, input: &str) {
        for ch in input.chars() {
            let key = if ch == '\n' {
                EditKey::Enter
            } else {
                EditKey::Char(ch)
            };
            console.apply_key(key).unwrap();
        }
    }

    fn queued(console: &Console) -> Vec<String> {
        let mut state = console.core.lock_input().unwrap();
        let mut lines = Vec::new();
        while let Some(line) = state.queue.pop() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn prompt_opens_editable_region() {
        let (_, console) = setup();
        console.show_prompt_now().unwrap();
        assert_eq!(text(&console), "> ");
        assert_eq!(console.state(), StreamState::WaitingForInput);
        console
            .with_surface(|surface| {
                let surface = surface.as_any().downcast_ref::<TextSurface>().unwrap();
                assert!(surface.is_editable());
                assert_eq!(surface.text_with_style(console.prompt_style()), "> ");
            })
            .unwrap();
    }

    #[test]
    fn prompt_starts_on_a_fresh_line() {
        let (scheduler, console) = setup();
        let out = console.output_aggregator(None, false).unwrap();
        out.write_str("partial").unwrap();
        scheduler.run_pending();
        console.show_prompt_now().unwrap();
        assert_eq!(text(&console), "partial\n> ");
    }

    #[test]
    fn enter_queues_the_line_and_goes_busy() {
        let (_, console) = setup();
        console.show_prompt_now().unwrap();
        type_str(&console, "ls -l\n");
        assert_eq!(text(&console), "> ls -l\n");
        assert_eq!(console.state(), StreamState::Busy);
        assert_eq!(queued(&console), vec!["ls -l\n"]);
        assert_eq!(console.history(), vec!["ls -l"]);
    }

    #[test]
    fn second_line_before_read_stays_waiting() {
        let (_, console) = setup();
        console.show_prompt_now().unwrap();
        type_str(&console, "one\n");
        console.core.lock_input().unwrap().mode = InputMode::WaitingForInput {
            line_start: 6,
            editable_start: 6,
        };
        type_str(&console, "two\n");
        assert_eq!(console.state(), StreamState::WaitingForInput);
        type_str(&console, "x");
        assert_eq!(text(&console), "> one\ntwo\nx");
        assert_eq!(queued(&console), vec!["one\n", "two\n"]);
    }

    #[test]
    fn busy_typing_is_replayed_at_next_prompts() {
        let (_, console) = setup();
        type_str(&console, "ls\np");
        assert_eq!(text(&console), "");

        console.show_prompt_now().unwrap();
        assert_eq!(text(&console), "> ls\n");
        assert_eq!(console.state(), StreamState::Busy);
        assert_eq!(queued(&console), vec!["ls\n"]);

        console.show_prompt_now().unwrap();
        assert_eq!(text(&console), "> ls\n> p");
        assert_eq!(console.state(), StreamState::WaitingForInput);
    }

    #[test]
    fn caret_cannot_leave_the_editable_region() {
        let (_, console) = setup();
        console.show_prompt_now().unwrap();
        assert_eq!(console.apply_key(EditKey::Backspace).unwrap(), KeyOutcome::Rejected);
        assert_eq!(console.apply_key(EditKey::Left).unwrap(), KeyOutcome::Rejected);
        assert_eq!(console.apply_key(EditKey::Home).unwrap(), KeyOutcome::Rejected);
        type_str(&console, "ab");
        assert_eq!(console.apply_key(EditKey::Home).unwrap(), KeyOutcome::Consumed);
        type_str(&console, "x");
        assert_eq!(text(&console), "> xab");
        assert_eq!(console.apply_key(EditKey::End).unwrap(), KeyOutcome::Consumed);
        assert_eq!(console.apply_key(EditKey::Backspace).unwrap(), KeyOutcome::Consumed);
        assert_eq!(text(&console), "> xa");

        let beeps = console
            .with_surface(|s| s.as_any().downcast_ref::<TextSurface>().unwrap().beeps())
            .unwrap();
        assert_eq!(beeps, 3);
    }

    #[test]
    fn history_recall_replaces_the_region() {
        let (_, console) = setup();
        for line in ["first", "second"] {
            console.show_prompt_now().unwrap();
            type_str(&console, &format!("{line}\n"));
            assert_eq!(queued(&console), vec![format!("{line}\n")]);
        }
        console.show_prompt_now().unwrap();
        type_str(&console, "draft");

        console.apply_key(EditKey::Up).unwrap();
        assert!(text(&console).ends_with("> second"));
        console.apply_key(EditKey::Up).unwrap();
        assert!(text(&console).ends_with("> first"));
        assert_eq!(console.apply_key(EditKey::Up).unwrap(), KeyOutcome::Rejected);
        console.apply_key(EditKey::Down).unwrap();
        assert!(text(&console).ends_with("> second"));
        assert_eq!(console.apply_key(EditKey::Down).unwrap(), KeyOutcome::Rejected);
    }

    #[test]
    fn output_while_waiting_reissues_the_prompt_below() {
        let (scheduler, console) = setup();
        let out = console.output_aggregator(None, false).unwrap();
        console.show_prompt_now().unwrap();
        type_str(&console, "ab");

        out.write_str("tick\n").unwrap();
        scheduler.run_pending();

        assert_eq!(text(&console), "tick\n> ab");
        assert_eq!(console.state(), StreamState::WaitingForInput);
        type_str(&console, "c\n");
        assert_eq!(queued(&console), vec!["abc\n"]);
    }

    #[test]
    fn writers_coalesce_per_style() {
        let (scheduler, console) = setup();
        let red = StyleToken::named("red");
        let out = console.output_aggregator(None, false).unwrap();
        let err = console.output_aggregator(Some(red.clone()), false).unwrap();

        out.write_str("a").unwrap();
        out.write_str("b").unwrap();
        err.write_str("E").unwrap();
        out.write_str("c").unwrap();
        assert_eq!(scheduler.run_pending(), 1);

        assert_eq!(text(&console), "abEc");
        console
            .with_surface(|s| {
                let s = s.as_any().downcast_ref::<TextSurface>().unwrap();
                assert_eq!(s.text_with_style(&red), "E");
                assert_eq!(s.text_with_style(console.default_style()), "abc");
            })
            .unwrap();
    }

    #[test]
    fn flush_respects_a_scrolled_viewport() {
        let (scheduler, console) = setup();
        let out = console.output_aggregator(None, false).unwrap();
        out.write_str("one\n").unwrap();
        scheduler.run_pending();

        console
            .with_surface(|s| s.as_any_mut().downcast_mut::<TextSurface>().unwrap().scroll_up())
            .unwrap();
        out.write_str("two\n").unwrap();
        scheduler.run_pending();
        assert!(!console.with_surface(|s| s.is_scrolled_to_bottom()).unwrap());
    }

    #[test]
    fn scrollback_cap_keeps_the_editable_region_intact() {
        let config = ConsoleConfig {
            max_scrollback: 3,
            ..ConsoleConfig::default()
        };
        let (scheduler, console) = setup_with(config);
        let out = console.output_aggregator(None, false).unwrap();
        console.show_prompt_now().unwrap();
        type_str(&console, "ab");
        out.write_str("1\n2\n3\n4\n").unwrap();
        scheduler.run_pending();

        assert_eq!(text(&console), "3\n4\n> ab");
        type_str(&console, "\n");
        assert_eq!(queued(&console), vec!["ab\n"]);
    }

    #[test]
    fn injected_text_while_waiting_replaces_the_region() {
        let (scheduler, console) = setup();
        console.show_prompt_now().unwrap();
        type_str(&console, "ab");
        console.inject_text("x\ny");
        scheduler.run_pending();

        assert_eq!(text(&console), "> x\n");
        assert_eq!(queued(&console), vec!["x\n"]);
        assert_eq!(console.core.lock_input().unwrap().edit.paste_ahead(), "y\nab");
    }

    #[test]
    fn injected_lines_while_busy_are_accepted_in_order() {
        let (scheduler, console) = setup();
        console.inject_text("a\nb\nc");
        scheduler.run_pending();
        let mut accepted = Vec::new();
        for _ in 0..3 {
            console.show_prompt_now().unwrap();
            accepted.extend(queued(&console));
        }
        assert_eq!(accepted, vec!["a\n", "b\n", "c\n"]);
    }

    #[test]
    fn paste_is_sanitised_and_split() {
        let (scheduler, console) = setup();
        console.show_prompt_now().unwrap();
        console.paste("\u{1b}[31mred\u{1b}[0m\tz");
        scheduler.run_pending();
        assert_eq!(text(&console), "> redz");

        console.paste("1\n2");
        scheduler.run_pending();
        assert_eq!(queued(&console), vec!["redz1\n"]);
        assert_eq!(console.core.lock_input().unwrap().edit.paste_ahead(), "2");
    }

    #[test]
    fn clear_keeps_the_input_in_progress() {
        let (scheduler, console) = setup();
        let out = console.output_aggregator(None, false).unwrap();
        out.write_str("noise\n").unwrap();
        scheduler.run_pending();
        console.show_prompt_now().unwrap();
        type_str(&console, "ab");

        console.clear();
        scheduler.run_pending();
        assert_eq!(text(&console), "> ab");
        assert_eq!(console.state(), StreamState::WaitingForInput);
    }

    #[test]
    fn one_time_prompt_lasts_for_one_line() {
        let (_, console) = setup();
        let input = console.input_channel(Some("$ ")).unwrap();
        input.set_one_time_prompt("? ").unwrap();
        console.show_prompt_now().unwrap();
        type_str(&console, "y\n");
        console.show_prompt_now().unwrap();
        assert_eq!(text(&console), "? y\n$ ");
    }

    #[test]
    fn initial_entry_is_prefilled_once() {
        let (_, console) = setup();
        let input = console.input_channel(None).unwrap();
        input.set_initial_entry("default").unwrap();
        console.show_prompt_now().unwrap();
        type_str(&console, "\n");
        console.show_prompt_now().unwrap();
        assert_eq!(text(&console), "> default\n> ");
        assert_eq!(queued(&console), vec!["default\n"]);
    }

    #[test]
    fn blocked_reader_gets_the_typed_line() {
        let (scheduler, console) = setup();
        let mut input = console.input_channel(None).unwrap();
        let reader = thread::spawn(move || input.read_line().unwrap());

        let waiting = scheduler.run_until(Duration::from_secs(5), || {
            console.state() == StreamState::WaitingForInput
        });
        assert!(waiting);
        type_str(&console, "hello\n");
        assert_eq!(reader.join().unwrap().as_deref(), Some("hello"));
    }

    #[test]
    fn dispose_wakes_reader_and_fails_writers() {
        let (scheduler, console) = setup();
        let out = console.output_aggregator(None, false).unwrap();
        let mut input = console.input_channel(None).unwrap();
        let reader = thread::spawn(move || input.read_byte().unwrap());

        scheduler.run_until(Duration::from_secs(5), || {
            console.state() == StreamState::WaitingForInput
        });
        console.dispose();
        console.dispose();

        assert_eq!(reader.join().unwrap(), None);
        assert!(out.write_str("late").unwrap_err().is_closed());
        assert!(console.output_aggregator(None, false).unwrap_err().is_closed());
        assert_eq!(console.state(), StreamState::Closed);
        scheduler.run_pending();
    }

    #[test]
    fn read_interrupt_is_one_shot() {
        let (scheduler, console) = setup();
        let mut input = console.input_channel(None).unwrap();
        input.interrupt().unwrap();
        assert!(matches!(input.read_byte(), Err(ConsoleError::Interrupted)));

        console.show_prompt_now().unwrap();
        type_str(&console, "ok\n");
        scheduler.run_pending();
        assert_eq!(input.read_line().unwrap().as_deref(), Some("ok"));
    }

    #[test]
    fn ctrl_c_notifies_listeners() {
        let (_, console) = setup();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = console.add_interrupt_listener(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        console.apply_key(EditKey::Interrupt).unwrap();
        assert!(console.remove_interrupt_listener(id));
        console.apply_key(EditKey::Interrupt).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn auto_show_is_suppressed_while_visible() {
        let (_, console) = setup();
        let shows = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&shows);
        console.set_show_hook(Arc::new(move |_: &Console| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let loud = console.output_aggregator(None, true).unwrap();
        let quiet = console.output_aggregator(None, false).unwrap();

        quiet.write_str("q").unwrap();
        loud.write_str("l").unwrap();
        console.surface_event(SurfaceEvent::Shown).unwrap();
        loud.write_str("l").unwrap();
        assert_eq!(shows.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn auto_show_policy_overrides_writers() {
        let config = ConsoleConfig {
            auto_show: AutoShow::Never,
            ..ConsoleConfig::default()
        };
        let (_, console) = setup_with(config);
        let shows = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&shows);
        console.set_show_hook(Arc::new(move |_: &Console| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        console.output_aggregator(None, true).unwrap().write_str("x").unwrap();
        assert_eq!(shows.load(Ordering::SeqCst), 0);
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn transcript_captures_output_and_accepted_lines() {
        let (scheduler, console) = setup();
        let buf = SharedBuf::default();
        console.set_transcript(Some(Box::new(buf.clone()))).unwrap();
        let out = console.output_aggregator(None, false).unwrap();
        out.write_str("hi\n").unwrap();
        scheduler.run_pending();
        console.show_prompt_now().unwrap();
        type_str(&console, "ls\n");

        let captured = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(captured, "hi\n> ls\n");
        console.dispose();
        assert!(!console.transcript_enabled());
    }

    #[test]
    fn lifecycle_is_logged() {
        let sink = MemorySink::new();
        let config = ConsoleConfig::default().with_logger(Logger::new(sink.clone()));
        let (_, console) = setup_with(config);
        console.show_prompt_now().unwrap();
        type_str(&console, "x\n");
        console.dispose();
        assert!(sink.contains("console_created"));
        assert!(sink.contains("prompt_shown"));
        assert!(sink.contains("line_accepted"));
        assert!(sink.contains("console_disposed"));
    }

    #[test]
    fn split_character_survives_separate_flushes() {
        let (scheduler, console) = setup();
        let out = console.output_aggregator(None, false).unwrap();
        let bytes = "é".as_bytes();
        out.write_bytes(&bytes[..1]).unwrap();
        scheduler.run_pending();
        assert_eq!(text(&console), "");
        out.write_bytes(&bytes[1..]).unwrap();
        scheduler.run_pending();
        assert_eq!(text(&console), "é");
    }

    #[test]
    fn transcript_copies_output_when_it_renders() {
        let (scheduler, console) = setup();
        let buf = SharedBuf::default();
        console.set_transcript(Some(Box::new(buf.clone()))).unwrap();
        let out = console.output_aggregator(None, false).unwrap();
        out.write_str("pending\n").unwrap();
        assert!(buf.0.lock().unwrap().is_empty());
        scheduler.run_pending();
        assert_eq!(buf.0.lock().unwrap().as_slice(), b"pending\n");
    }

    /// Delegates to a [`TextSurface`] but refuses text in one style.
    struct RejectingSurface {
        inner: TextSurface,
        rejected: StyleToken,
    }

    impl DisplaySurface for RejectingSurface {
        fn insert_text(&mut self, position: usize, text: &str, style: &StyleToken) -> Result<()> {
            if style.same(&self.rejected) {
                return Err(ConsoleError::render("style not supported"));
            }
            self.inner.insert_text(position, text, style)
        }

        fn remove_range(&mut self, start: usize, end: usize) -> Result<()> {
            self.inner.remove_range(start, end)
        }

        fn text_range(&self, start: usize, end: usize) -> Result<String> {
            self.inner.text_range(start, end)
        }

        fn caret_position(&self) -> usize {
            self.inner.caret_position()
        }

        fn set_caret_position(&mut self, position: usize) -> Result<()> {
            self.inner.set_caret_position(position)
        }

        fn document_length(&self) -> usize {
            self.inner.document_length()
        }

        fn is_scrolled_to_bottom(&self) -> bool {
            self.inner.is_scrolled_to_bottom()
        }

        fn set_viewport_to_bottom(&mut self) {
            self.inner.set_viewport_to_bottom()
        }

        fn column_at(&self, position: usize) -> usize {
            self.inner.column_at(position)
        }

        fn line_count(&self) -> usize {
            self.inner.line_count()
        }

        fn line_start_offset(&self, line: usize) -> Option<usize> {
            self.inner.line_start_offset(line)
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self.inner.as_any()
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self.inner.as_any_mut()
        }
    }

    #[test]
    fn failed_run_is_logged_and_the_rest_render() {
        let sink = MemorySink::new();
        let config = ConsoleConfig::default().with_logger(Logger::new(sink.clone()));
        let bad = StyleToken::named("bad");
        let scheduler = Arc::new(ManualScheduler::new());
        let console = Console::new(
            "render",
            config,
            scheduler.clone(),
            Box::new(RejectingSurface {
                inner: TextSurface::new(),
                rejected: bad.clone(),
            }),
        );
        let out = console.output_aggregator(None, false).unwrap();
        let broken = console.output_aggregator(Some(bad), false).unwrap();

        out.write_str("before ").unwrap();
        broken.write_str("lost ").unwrap();
        out.write_str("after").unwrap();
        assert_eq!(scheduler.run_pending(), 1);

        assert_eq!(text(&console), "before after");
        assert!(sink.contains("render_failed"));
    }

    #[test]
    fn redisplay_leaves_pasted_lines_for_the_reader() {
        let (scheduler, console) = setup();
        let out = console.output_aggregator(None, false).unwrap();
        console.show_prompt_now().unwrap();
        type_str(&console, "a\n");
        console.show_prompt_now().unwrap();
        type_str(&console, "b\n");
        console.inject_now("c\nd").unwrap();
        type_str(&console, "xy");

        out.write_str("tick\n").unwrap();
        scheduler.run_pending();
        assert!(text(&console).ends_with("tick\n> xy"));
        assert_eq!(console.state(), StreamState::WaitingForInput);
        assert_eq!(console.core.lock_input().unwrap().edit.paste_ahead(), "d\n");
        assert_eq!(queued(&console), vec!["a\n", "b\n", "c\n"]);

        console.show_prompt_now().unwrap();
        assert_eq!(queued(&console), vec!["d\n"]);
        assert_eq!(console.state(), StreamState::Busy);
        console.show_prompt_now().unwrap();
        assert!(text(&console).ends_with("tick\n> d\n> xy"));
        assert_eq!(console.state(), StreamState::WaitingForInput);
    }

    #[test]
    fn sanitize_drops_escapes_and_controls() {
        assert_eq!(sanitize_paste("a\u{1b}[1mb\u{7}\r\nc"), "ab\nc");
    }
}
