use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::config::ConsoleConfig;
use crate::console::{Console, ConsoleResolver, OutputAggregator};
use crate::error::{ConsoleError, Result};
use crate::logging::{LogLevel, emit, json_str};
use crate::runtime::{Scheduler, invoke_and_wait};
use crate::style::StyleToken;
use crate::surface::{DisplaySurface, TextSurface};

const REGISTRY_TARGET: &str = "console::registry";

/// The host's paging system. Called on the display thread.
pub trait PageHost: Send + Sync {
    /// Add a page for a newly created console.
    fn open_page(&self, name: &str) -> Result<()>;

    /// Bring the console's page to the front.
    fn request_show(&self, name: &str);

    /// Remove the page. The host may call back into
    /// [`ConsoleRegistry::page_closed`]; that call is idempotent.
    fn close_page(&self, name: &str);
}

/// Host with no pages, for headless use.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPageHost;

impl PageHost for NullPageHost {
    fn open_page(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn request_show(&self, _name: &str) {}

    fn close_page(&self, _name: &str) {}
}

/// Builds the surface for a console, given its name.
pub type SurfaceFactory = Arc<dyn Fn(&str) -> Box<dyn DisplaySurface> + Send + Sync>;

struct RegistryInner {
    consoles: Mutex<HashMap<String, Console>>,
    scheduler: Arc<dyn Scheduler>,
    host: Arc<dyn PageHost>,
    surfaces: SurfaceFactory,
    config: ConsoleConfig,
    this: Weak<RegistryInner>,
}

/// Name-keyed console lookup and creation.
///
/// Creation always happens on the display thread; callers on other threads
/// block until it is done. Cloning shares the registry.
#[derive(Clone)]
pub struct ConsoleRegistry {
    inner: Arc<RegistryInner>,
}

impl ConsoleRegistry {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        host: Arc<dyn PageHost>,
        config: ConsoleConfig,
        surfaces: SurfaceFactory,
    ) -> Self {
        Self {
            inner: Arc::new_cyclic(|this| RegistryInner {
                consoles: Mutex::new(HashMap::new()),
                scheduler,
                host,
                surfaces,
                config,
                this: this.clone(),
            }),
        }
    }

    /// In-memory surfaces and no page host.
    pub fn headless(scheduler: Arc<dyn Scheduler>, config: ConsoleConfig) -> Self {
        Self::new(
            scheduler,
            Arc::new(NullPageHost),
            config,
            Arc::new(|_: &str| Box::new(TextSurface::new()) as Box<dyn DisplaySurface>),
        )
    }

    pub fn get_console(&self, name: &str) -> Option<Console> {
        self.inner.get(name)
    }

    /// Create the console named `name`, or return the live one already
    /// registered under it.
    pub fn create_console(&self, name: &str) -> Result<Console> {
        self.inner.create_blocking(name)
    }

    /// A writer for `name` that binds on first write, creating the console if
    /// needed, and rebinds once if the console is later closed.
    pub fn get_output_aggregator(
        &self,
        name: &str,
        style: Option<StyleToken>,
        auto_show: bool,
    ) -> OutputAggregator {
        let resolver: Weak<dyn ConsoleResolver> = self.inner.this.clone();
        OutputAggregator::resolving(name, style, auto_show, resolver)
    }

    pub fn show_console(&self, console: &Console) {
        self.inner.show(console);
    }

    /// Close the console's page and dispose the console.
    pub fn close_console(&self, name: &str) -> bool {
        self.inner.host.close_page(name);
        self.page_closed(name)
    }

    /// The host reports a page was closed. Disposes and forgets the console;
    /// returns whether one was registered.
    pub fn page_closed(&self, name: &str) -> bool {
        let removed = self
            .inner
            .consoles
            .lock()
            .ok()
            .and_then(|mut consoles| consoles.remove(name));
        match removed {
            Some(console) => {
                console.dispose();
                self.inner.log(LogLevel::Info, "console_closed", name);
                true
            }
            None => false,
        }
    }

    pub fn console_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .consoles
            .lock()
            .map(|consoles| consoles.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Dispose every console, e.g. at host shutdown.
    pub fn dispose_all(&self) {
        let consoles: Vec<Console> = self
            .inner
            .consoles
            .lock()
            .map(|mut consoles| consoles.drain().map(|(_, console)| console).collect())
            .unwrap_or_default();
        for console in consoles {
            console.dispose();
        }
    }
}

impl RegistryInner {
    fn get(&self, name: &str) -> Option<Console> {
        self.consoles
            .lock()
            .ok()
            .and_then(|consoles| consoles.get(name).cloned())
    }

    fn create_blocking(&self, name: &str) -> Result<Console> {
        let Some(this) = self.this.upgrade() else {
            return Err(ConsoleError::ConsoleNotFound(name.to_string()));
        };
        let name = name.to_string();
        invoke_and_wait(self.scheduler.as_ref(), move || this.create_on_display(&name))
    }

    fn create_on_display(&self, name: &str) -> Result<Console> {
        if let Some(existing) = self.get(name).filter(|console| !console.is_disposed()) {
            return Ok(existing);
        }
        let console = Console::new(
            name,
            self.config.clone(),
            Arc::clone(&self.scheduler),
            (self.surfaces)(name),
        );
        let registry = self.this.clone();
        console.set_show_hook(Arc::new(move |console: &Console| {
            if let Some(registry) = registry.upgrade() {
                registry.show(console);
            }
        }));
        if let Err(err) = self.host.open_page(name) {
            console.dispose();
            return Err(err);
        }
        let replaced = self
            .consoles
            .lock()
            .map_err(|_| ConsoleError::Poisoned)?
            .insert(name.to_string(), console.clone());
        if let Some(stale) = replaced {
            stale.dispose();
        }
        self.log(LogLevel::Info, "console_registered", name);
        Ok(console)
    }

    fn show(&self, console: &Console) {
        let name = console.name().to_string();
        if self.scheduler.is_display_thread() {
            self.host.request_show(&name);
            return;
        }
        let host = Arc::clone(&self.host);
        self.scheduler.post(Box::new(move || {
            host.request_show(&name);
            Ok(())
        }));
    }

    fn log(&self, level: LogLevel, message: &str, name: &str) {
        emit(
            self.config.logger.as_ref(),
            level,
            REGISTRY_TARGET,
            message,
            [json_str("console", name)],
        );
    }
}

impl ConsoleResolver for RegistryInner {
    fn resolve(&self, name: &str) -> Result<Console> {
        match self.get(name).filter(|console| !console.is_disposed()) {
            Some(console) => Ok(console),
            None => self.create_blocking(name),
        }
    }
}
