//! Interactive console stream multiplexing.
//!
//! A [`Console`] joins one display surface to a blocking [`InputChannel`]
//! (what the user typed, line by line) and any number of [`OutputAggregator`]s
//! (what programs write, coalesced and flushed in batches). All display work
//! runs on a single display thread reached through a [`Scheduler`]; the
//! [`ConsoleRegistry`] looks consoles up by name and creates them there.

pub mod config;
pub mod console;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod registry;
pub mod runtime;
pub mod style;
pub mod surface;

pub use config::{AutoShow, ConsoleConfig, ConsoleSettings};
pub use console::{
    Console, ConsoleResolver, EditBuffer, EditKey, History, InputChannel, InterruptListener,
    KeyOutcome, LineQueue, OutputAggregator, OutputRun, StreamState,
};
pub use error::{ConsoleError, Result};
pub use logging::{
    FileSink, LogEvent, LogFields, LogLevel, LogSink, Logger, LoggingError, LoggingResult,
    MemorySink,
};
pub use metrics::{ConsoleMetrics, MetricSnapshot, SharedMetrics};
pub use registry::{ConsoleRegistry, NullPageHost, PageHost, SurfaceFactory, ThreadRouter};
pub use runtime::{
    DisplayLoop, ManualScheduler, RuntimeConfig, Scheduler, Task, invoke_and_wait,
};
pub use style::{StyleSpec, StyleToken};
pub use surface::{DisplaySurface, SurfaceEvent, TextSurface};
