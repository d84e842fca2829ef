use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Mutex;
use std::thread::{self, ThreadId};

use crate::console::OutputAggregator;
use crate::error::{ConsoleError, Result};

/// A shared writer that sends each thread's bytes to the aggregator routed
/// for that thread, and everything else to `fallback`.
///
/// A route whose console has closed is dropped on the next write from that
/// thread, and the bytes go to the fallback instead.
pub struct ThreadRouter<W> {
    routes: Mutex<HashMap<ThreadId, OutputAggregator>>,
    fallback: Mutex<W>,
}

impl<W: Write + Send> ThreadRouter<W> {
    pub fn new(fallback: W) -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            fallback: Mutex::new(fallback),
        }
    }

    pub fn route_current_thread(&self, aggregator: OutputAggregator) -> Option<OutputAggregator> {
        self.route(thread::current().id(), aggregator)
    }

    pub fn route(&self, thread: ThreadId, aggregator: OutputAggregator) -> Option<OutputAggregator> {
        self.routes
            .lock()
            .ok()
            .and_then(|mut routes| routes.insert(thread, aggregator))
    }

    pub fn unroute_current_thread(&self) -> Option<OutputAggregator> {
        let id = thread::current().id();
        self.routes.lock().ok().and_then(|mut routes| routes.remove(&id))
    }

    pub fn is_routed(&self, thread: ThreadId) -> bool {
        self.routes
            .lock()
            .map(|routes| routes.contains_key(&thread))
            .unwrap_or(false)
    }

    pub fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        let id = thread::current().id();
        let routed = self
            .routes
            .lock()
            .map_err(|_| ConsoleError::Poisoned)?
            .get(&id)
            .cloned();
        if let Some(aggregator) = routed {
            match aggregator.write_bytes(bytes) {
                Err(ConsoleError::Closed) => {
                    if let Ok(mut routes) = self.routes.lock() {
                        routes.remove(&id);
                    }
                }
                other => return other,
            }
        }
        let mut fallback = self.fallback.lock().map_err(|_| ConsoleError::Poisoned)?;
        fallback.write_all(bytes)?;
        Ok(())
    }

    fn flush_fallback(&self) -> io::Result<()> {
        match self.fallback.lock() {
            Ok(mut fallback) => fallback.flush(),
            Err(_) => Err(ConsoleError::Poisoned.into()),
        }
    }
}

impl<W: Write + Send> Write for &ThreadRouter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_fallback()
    }
}

impl<W: Write + Send> Write for ThreadRouter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_fallback()
    }
}
