use std::path::PathBuf;
use std::time::Duration;

use crossterm::style::Color;
use serde::{Deserialize, Serialize};

use crate::error::{ConsoleError, Result};
use crate::logging::{FileSink, Logger};
use crate::metrics::{ConsoleMetrics, SharedMetrics};
use crate::style::default_prompt_color;

pub const DEFAULT_PROMPT: &str = "> ";
pub const DEFAULT_MAX_HISTORY: usize = 100;
pub const DEFAULT_MAX_SCROLLBACK: usize = 1000;
pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_millis(10);
pub const DEFAULT_LOG_MAX_BYTES: u64 = 1024 * 1024;

/// Console-wide policy for revealing the console page when output arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoShow {
    /// Reveal only when the writing aggregator asked for it.
    #[default]
    Default,
    Never,
    Always,
}

impl AutoShow {
    pub fn should_show(self, requested_by_writer: bool) -> bool {
        match self {
            AutoShow::Always => true,
            AutoShow::Never => false,
            AutoShow::Default => requested_by_writer,
        }
    }
}

/// Configuration knobs for a single console.
#[derive(Clone, Debug)]
pub struct ConsoleConfig {
    /// Accepted lines kept for Up/Down recall.
    pub max_history: usize,
    /// Display lines kept before the oldest are evicted.
    pub max_scrollback: usize,
    pub default_prompt: String,
    pub prompt_color: Color,
    /// Delay between the first pending write and the flush that renders it.
    pub flush_delay: Duration,
    pub auto_show: AutoShow,
    pub logger: Option<Logger>,
    pub metrics: Option<SharedMetrics>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            max_scrollback: DEFAULT_MAX_SCROLLBACK,
            default_prompt: DEFAULT_PROMPT.to_string(),
            prompt_color: default_prompt_color(),
            flush_delay: DEFAULT_FLUSH_DELAY,
            auto_show: AutoShow::Default,
            logger: None,
            metrics: None,
        }
    }
}

impl ConsoleConfig {
    pub fn from_settings(settings: &ConsoleSettings) -> Result<Self> {
        let mut config = Self::default();
        settings.apply(&mut config)?;
        Ok(config)
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Enable metrics collection if it has not already been configured.
    pub fn enable_metrics(&mut self) {
        if self.metrics.is_none() {
            self.metrics = Some(ConsoleMetrics::shared());
        }
    }

    pub fn metrics_handle(&self) -> Option<SharedMetrics> {
        self.metrics.clone()
    }
}

/// Serializable subset of [`ConsoleConfig`], typically read from a JSON file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleSettings {
    pub max_history: usize,
    pub max_scrollback: usize,
    pub prompt: String,
    pub flush_delay_ms: u64,
    pub auto_show: AutoShow,
    /// JSON-line log destination. Absent keeps whatever logger is configured.
    pub log_file: Option<PathBuf>,
    /// Size at which the log file starts over. Zero never truncates.
    pub log_max_bytes: u64,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            max_scrollback: DEFAULT_MAX_SCROLLBACK,
            prompt: DEFAULT_PROMPT.to_string(),
            flush_delay_ms: DEFAULT_FLUSH_DELAY.as_millis() as u64,
            auto_show: AutoShow::Default,
            log_file: None,
            log_max_bytes: DEFAULT_LOG_MAX_BYTES,
        }
    }
}

impl ConsoleSettings {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|err| ConsoleError::Settings(err.to_string()))
    }

    pub fn apply(&self, config: &mut ConsoleConfig) -> Result<()> {
        if self.max_history == 0 {
            return Err(ConsoleError::Settings("max_history must be positive".into()));
        }
        if self.max_scrollback == 0 {
            return Err(ConsoleError::Settings(
                "max_scrollback must be positive".into(),
            ));
        }
        config.max_history = self.max_history;
        config.max_scrollback = self.max_scrollback;
        config.default_prompt = self.prompt.clone();
        config.flush_delay = Duration::from_millis(self.flush_delay_ms);
        config.auto_show = self.auto_show;
        if let Some(path) = &self.log_file {
            config.logger = Some(Logger::new(FileSink::new(path, self.log_max_bytes)?));
        }
        Ok(())
    }
}
