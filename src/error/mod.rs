mod types;

pub use types::{ConsoleError, Result};
