use std::io;

use thiserror::Error;

use crate::logging::LoggingError;

/// Unified result type for the console crate.
pub type Result<T> = std::result::Result<T, ConsoleError>;

/// Errors surfaced by the console streams, the scheduler and the registry.
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("console stream closed")]
    Closed,
    #[error("blocked read interrupted")]
    Interrupted,
    #[error("display update failed: {0}")]
    Render(String),
    #[error("console `{0}` not found")]
    ConsoleNotFound(String),
    #[error("display scheduler stopped")]
    SchedulerStopped,
    #[error("console lock poisoned")]
    Poisoned,
    #[error("invalid settings: {0}")]
    Settings(String),
    #[error("logging failure: {0}")]
    Logging(#[from] LoggingError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ConsoleError {
    pub fn render(message: impl Into<String>) -> Self {
        ConsoleError::Render(message.into())
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ConsoleError::Closed)
    }

    /// Whether an error from a console `Read`/`Write` impl is a reader interrupt.
    pub fn is_interrupted_io(err: &io::Error) -> bool {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<ConsoleError>())
            .is_some_and(|inner| matches!(inner, ConsoleError::Interrupted))
    }
}

impl From<ConsoleError> for io::Error {
    fn from(err: ConsoleError) -> Self {
        match err {
            ConsoleError::Io(inner) => inner,
            ConsoleError::Closed => io::Error::new(io::ErrorKind::BrokenPipe, err),
            // std's read helpers retry `ErrorKind::Interrupted`, which would
            // swallow the one-shot interrupt.
            other => io::Error::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_conversion_keeps_kind() {
        let closed: io::Error = ConsoleError::Closed.into();
        assert_eq!(closed.kind(), io::ErrorKind::BrokenPipe);

        let interrupted: io::Error = ConsoleError::Interrupted.into();
        assert_ne!(interrupted.kind(), io::ErrorKind::Interrupted);
        assert!(ConsoleError::is_interrupted_io(&interrupted));

        let render: io::Error = ConsoleError::render("bad range").into();
        assert_eq!(render.kind(), io::ErrorKind::Other);
    }
}
