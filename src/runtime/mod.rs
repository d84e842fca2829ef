//! The display thread: a single-threaded, cooperative callback queue that owns
//! every display mutation.
//!
//! Other threads never touch the display directly; they post [`Task`]s through
//! the [`Scheduler`] trait. [`DisplayLoop`] is the production implementation,
//! running tasks on a dedicated thread. [`ManualScheduler`] runs them only when
//! asked, which keeps display-thread tests deterministic.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use serde_json::json;

use crate::error::{ConsoleError, Result};
use crate::logging::{LogLevel, Logger, emit, json_kv};
use crate::metrics::{self, ConsoleMetrics, SharedMetrics};

mod manual;

pub use manual::ManualScheduler;

/// A unit of display-thread work. Errors are logged by the scheduler and never
/// stop later tasks from running.
pub type Task = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

pub trait Scheduler: Send + Sync {
    /// Queue `task` to run on the display thread after everything already queued.
    fn post(&self, task: Task);

    /// Queue `task` to run no earlier than `delay` from now.
    fn post_delayed(&self, delay: Duration, task: Task);

    fn is_display_thread(&self) -> bool;
}

/// Run `f` on the display thread and block until it finishes. Runs inline when
/// already on the display thread.
pub fn invoke_and_wait<T, F>(scheduler: &dyn Scheduler, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    if scheduler.is_display_thread() {
        return f();
    }
    let (tx, rx) = mpsc::sync_channel(1);
    scheduler.post(Box::new(move || {
        let _ = tx.send(f());
        Ok(())
    }));
    rx.recv().map_err(|_| ConsoleError::SchedulerStopped)?
}

/// Configuration knobs for the display loop.
#[derive(Clone)]
pub struct RuntimeConfig {
    /// Longest time the loop sleeps when no task is due.
    pub idle_interval: Duration,
    pub logger: Option<Logger>,
    pub metrics: Option<SharedMetrics>,
    /// Interval between metrics snapshot emissions. Zero disables snapshots.
    pub metrics_interval: Duration,
    pub metrics_target: String,
    pub thread_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_millis(200),
            logger: None,
            metrics: None,
            metrics_interval: Duration::from_secs(5),
            metrics_target: "console::metrics".to_string(),
            thread_name: "console-display".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn enable_metrics(&mut self) {
        if self.metrics.is_none() {
            self.metrics = Some(ConsoleMetrics::shared());
        }
    }

    pub fn metrics_handle(&self) -> Option<SharedMetrics> {
        self.metrics.clone()
    }
}

enum Message {
    Run(Task),
    Delayed { deadline: Instant, task: Task },
    Shutdown,
}

struct DelayedTask {
    deadline: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for DelayedTask {}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Thread-backed [`Scheduler`]. Dropping the last handle stops the thread.
pub struct DisplayLoop {
    sender: Sender<Message>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
    logger: Option<Logger>,
}

impl DisplayLoop {
    pub fn spawn(config: RuntimeConfig) -> Result<Arc<Self>> {
        let (sender, receiver) = mpsc::channel();
        let logger = config.logger.clone();
        let handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || LoopState::new(config).run(receiver))?;
        let thread_id = handle.thread().id();
        Ok(Arc::new(Self {
            sender,
            thread_id,
            handle: Mutex::new(Some(handle)),
            logger,
        }))
    }

    /// Block until every task posted before this call has run.
    pub fn sync(&self) -> Result<()> {
        invoke_and_wait(self, || Ok(()))
    }

    /// Stop the loop after the tasks already queued. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.sender.send(Message::Shutdown);
        if thread::current().id() == self.thread_id {
            return;
        }
        let handle = self.handle.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn send(&self, message: Message) {
        if self.sender.send(message).is_err() {
            emit(
                self.logger.as_ref(),
                LogLevel::Debug,
                "console::runtime",
                "task_dropped",
                std::iter::empty(),
            );
        }
    }
}

impl Scheduler for DisplayLoop {
    fn post(&self, task: Task) {
        self.send(Message::Run(task));
    }

    fn post_delayed(&self, delay: Duration, task: Task) {
        if delay.is_zero() {
            self.send(Message::Run(task));
        } else {
            self.send(Message::Delayed {
                deadline: Instant::now() + delay,
                task,
            });
        }
    }

    fn is_display_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl Drop for DisplayLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct LoopState {
    config: RuntimeConfig,
    delayed: BinaryHeap<Reverse<DelayedTask>>,
    seq: u64,
    started: Instant,
    last_metrics_emit: Instant,
}

impl LoopState {
    fn new(config: RuntimeConfig) -> Self {
        let now = Instant::now();
        Self {
            config,
            delayed: BinaryHeap::new(),
            seq: 0,
            started: now,
            last_metrics_emit: now,
        }
    }

    fn run(mut self, receiver: Receiver<Message>) {
        self.log(LogLevel::Info, "runtime_started", std::iter::empty());
        loop {
            self.run_due();
            let timeout = self.next_timeout();
            match receiver.recv_timeout(timeout) {
                Ok(Message::Run(task)) => {
                    run_task(&self.config, task);
                }
                Ok(Message::Delayed { deadline, task }) => {
                    self.seq += 1;
                    self.delayed.push(Reverse(DelayedTask {
                        deadline,
                        seq: self.seq,
                        task,
                    }));
                }
                Ok(Message::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
            self.maybe_emit_metrics();
        }
        self.log(
            LogLevel::Info,
            "runtime_stopped",
            [
                json_kv("uptime_ms", json!(self.started.elapsed().as_millis() as u64)),
                json_kv("dropped_delayed", json!(self.delayed.len())),
            ],
        );
    }

    fn run_due(&mut self) {
        let now = Instant::now();
        while self
            .delayed
            .peek()
            .is_some_and(|Reverse(next)| next.deadline <= now)
        {
            if let Some(Reverse(due)) = self.delayed.pop() {
                run_task(&self.config, due.task);
            }
        }
    }

    fn next_timeout(&self) -> Duration {
        match self.delayed.peek() {
            Some(Reverse(next)) => next
                .deadline
                .saturating_duration_since(Instant::now())
                .min(self.config.idle_interval),
            None => self.config.idle_interval,
        }
    }

    fn maybe_emit_metrics(&mut self) {
        if self.config.metrics_interval.is_zero() {
            return;
        }
        let now = Instant::now();
        if now.duration_since(self.last_metrics_emit) < self.config.metrics_interval {
            return;
        }
        self.last_metrics_emit = now;

        if let (Some(logger), Some(metrics)) =
            (self.config.logger.as_ref(), self.config.metrics.as_ref())
        {
            if let Ok(guard) = metrics.lock() {
                let event = guard
                    .snapshot(now.duration_since(self.started))
                    .to_log_event(&self.config.metrics_target);
                let _ = logger.log_event(event);
            }
        }
    }

    fn log<I>(&self, level: LogLevel, message: &str, fields: I)
    where
        I: IntoIterator<Item = (String, serde_json::Value)>,
    {
        emit(
            self.config.logger.as_ref(),
            level,
            "console::runtime",
            message,
            fields,
        );
    }
}

/// Run one task, containing both returned errors and panics.
pub(crate) fn run_task(config: &RuntimeConfig, task: Task) -> bool {
    let outcome = panic::catch_unwind(AssertUnwindSafe(task));
    let failed = match outcome {
        Ok(Ok(())) => false,
        Ok(Err(err)) => {
            emit(
                config.logger.as_ref(),
                LogLevel::Warn,
                "console::runtime",
                "task_failed",
                [json_kv("error", json!(err.to_string()))],
            );
            true
        }
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            emit(
                config.logger.as_ref(),
                LogLevel::Error,
                "console::runtime",
                "task_panicked",
                [json_kv("panic", json!(reason))],
            );
            true
        }
    };
    metrics::record(config.metrics.as_ref(), |m| m.record_task(failed));
    failed
}
