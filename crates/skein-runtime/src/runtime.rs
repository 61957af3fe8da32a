//! Wiring of every collaborator around one scheduler

use crate::batch::DataSources;
use crate::cache::CacheFactory;
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::event_bus::EventBus;
use crate::http::{HttpClient, Transport};
use crate::injector::Injector;
use crate::render::{RenderFactory, Surface};
use crate::tasks::TaskRegistry;
use crate::template::{TemplateCache, TemplateLoader};
use skein_engine::{Interval, Kernel, Scheduler, Timeout};
use std::fmt;
use std::rc::Rc;

/// Service names under which [`Runtime::new`] registers its parts
pub mod services {
    pub const SCHEDULER: &str = "scheduler";
    pub const KERNEL: &str = "kernel";
    pub const TIMEOUT: &str = "timeout";
    pub const INTERVAL: &str = "interval";
    pub const CACHES: &str = "caches";
    pub const EVENT_BUS: &str = "event_bus";
    pub const HTTP: &str = "http";
    pub const TEMPLATES: &str = "templates";
    pub const TEMPLATE_LOADER: &str = "template_loader";
    pub const SOURCES: &str = "sources";
    pub const TASKS: &str = "tasks";
    pub const RENDER: &str = "render";
}

/// A scheduler plus the services built on it
pub struct Runtime {
    scheduler: Scheduler,
    kernel: Kernel,
    injector: Injector,
    caches: CacheFactory,
    bus: EventBus,
    http: HttpClient,
    templates: TemplateCache,
    loader: TemplateLoader,
    sources: DataSources,
    tasks: TaskRegistry,
    render: RenderFactory,
}

impl Runtime {
    /// Build a runtime from `config`
    ///
    /// Configured templates are seeded into the template cache and
    /// configured sources are registered. Every part is also registered in
    /// the injector under the names in [`services`].
    pub fn new(
        config: &RuntimeConfig,
        transport: Rc<dyn Transport>,
        surface: Rc<dyn Surface>,
    ) -> Result<Self, RuntimeError> {
        let scheduler = Scheduler::with_config(config.scheduler_config());
        Self::with_scheduler(scheduler, config, transport, surface)
    }

    /// Like [`Runtime::new`] over an existing scheduler
    ///
    /// Useful when the transport needs the scheduler before the runtime
    /// exists.
    pub fn with_scheduler(
        scheduler: Scheduler,
        config: &RuntimeConfig,
        transport: Rc<dyn Transport>,
        surface: Rc<dyn Surface>,
    ) -> Result<Self, RuntimeError> {
        let kernel = Kernel::new(scheduler.clone());
        let caches = CacheFactory::new();
        let bus = EventBus::new(kernel.clone());
        let http = HttpClient::new(kernel.clone(), transport);

        let templates = TemplateCache::new(&caches)?;
        for (tid, markup) in &config.templates {
            templates.put(tid.clone(), markup.clone());
        }
        let loader = TemplateLoader::new(kernel.clone(), &caches, templates.clone(), http.clone())?;

        let sources = DataSources::new(kernel.clone(), &caches, http.clone(), loader.clone())?;
        for (name, source) in &config.sources {
            sources.register(name.clone(), source.clone());
        }

        let render = RenderFactory::new(kernel.clone(), loader.clone(), bus.clone(), surface)?;
        let runtime = Self {
            injector: Injector::new(),
            tasks: TaskRegistry::new(),
            scheduler,
            kernel,
            caches,
            bus,
            http,
            templates,
            loader,
            sources,
            render,
        };
        runtime.register_services()?;
        tracing::debug!(
            templates = config.templates.len(),
            sources = config.sources.len(),
            "runtime ready"
        );
        Ok(runtime)
    }

    fn register_services(&self) -> Result<(), RuntimeError> {
        let injector = &self.injector;
        injector.register_instance(services::SCHEDULER, self.scheduler.clone())?;
        injector.register_instance(services::KERNEL, self.kernel.clone())?;
        injector.register_instance(services::CACHES, self.caches.clone())?;
        injector.register_instance(services::EVENT_BUS, self.bus.clone())?;
        injector.register_instance(services::HTTP, self.http.clone())?;
        injector.register_instance(services::TEMPLATES, self.templates.clone())?;
        injector.register_instance(services::TEMPLATE_LOADER, self.loader.clone())?;
        injector.register_instance(services::SOURCES, self.sources.clone())?;
        injector.register_instance(services::TASKS, self.tasks.clone())?;
        injector.register_instance(services::RENDER, self.render.clone())?;
        injector.register(services::TIMEOUT, |injector| {
            Ok(Timeout::new((*injector.get::<Kernel>(services::KERNEL)?).clone()))
        })?;
        injector.register(services::INTERVAL, |injector| {
            Ok(Interval::new((*injector.get::<Kernel>(services::KERNEL)?).clone()))
        })?;
        Ok(())
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn injector(&self) -> &Injector {
        &self.injector
    }

    pub fn caches(&self) -> &CacheFactory {
        &self.caches
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn templates(&self) -> &TemplateCache {
        &self.templates
    }

    pub fn loader(&self) -> &TemplateLoader {
        &self.loader
    }

    pub fn sources(&self) -> &DataSources {
        &self.sources
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn render(&self) -> &RenderFactory {
        &self.render
    }

    /// Drive the scheduler until no work is left
    pub fn run_until_idle(&self) -> Result<usize, RuntimeError> {
        Ok(self.scheduler.run_until_idle()?)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("scheduler", &self.scheduler)
            .field("injector", &self.injector)
            .field("caches", &self.caches)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::MemoryTransport;
    use crate::render::{MemorySurface, RenderConfig};
    use serde_json::json;

    fn runtime(config: &str) -> (Runtime, MemoryTransport, MemorySurface) {
        let config = RuntimeConfig::from_toml_str(config).unwrap();
        let scheduler = Scheduler::with_config(config.scheduler_config());
        let transport = MemoryTransport::new(scheduler.clone(), 5);
        let surface = MemorySurface::new();
        let runtime = Runtime::with_scheduler(
            scheduler,
            &config,
            Rc::new(transport.clone()),
            Rc::new(surface.clone()),
        )
        .unwrap();
        (runtime, transport, surface)
    }

    #[test]
    fn test_services_are_injectable() {
        let (runtime, _, _) = runtime("");
        let injector = runtime.injector();
        assert!(injector.get::<Kernel>(services::KERNEL).is_ok());
        assert!(injector.get::<EventBus>(services::EVENT_BUS).is_ok());
        let timeout = injector.get::<Timeout>(services::TIMEOUT).unwrap();
        let again = injector.get::<Timeout>(services::TIMEOUT).unwrap();
        assert!(Rc::ptr_eq(&timeout, &again));
    }

    #[test]
    fn test_config_seeds_templates_and_sources() {
        let (runtime, transport, surface) = runtime(
            r#"
            [sources.user]
            url = "/api/user"

            [templates]
            banner = "<h1>banner</h1>"
            "#,
        );
        transport.route("/api/user", json!({"name": "ada"}));
        assert!(runtime.sources().has("user"));
        assert_eq!(runtime.templates().get("banner").unwrap(), "<h1>banner</h1>");

        let node = runtime
            .render()
            .create(RenderConfig::new("top").template_id("banner"));
        runtime.render().show(node).unwrap();
        runtime.run_until_idle().unwrap();
        assert_eq!(surface.html("top").as_deref(), Some("<h1>banner</h1>"));
    }

    #[test]
    fn test_turn_limit_from_config() {
        let (runtime, _, _) = runtime("[scheduler]\nmax_turns = 10\n");
        let interval = runtime
            .injector()
            .get::<Interval>(services::INTERVAL)
            .unwrap();
        interval.schedule(|_| Ok(()), 1, 0);
        assert!(matches!(
            runtime.run_until_idle(),
            Err(RuntimeError::Engine(_))
        ));
    }
}
