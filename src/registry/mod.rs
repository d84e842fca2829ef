mod core;
mod routing;

pub use core::{ConsoleRegistry, NullPageHost, PageHost, SurfaceFactory};
pub use routing::ThreadRouter;
