//! Skein Runtime
//!
//! Collaborators built on the `skein-engine` core:
//! - **Injector**: named singleton services with cycle detection (`injector` module)
//! - **Caches**: named key/value caches (`cache` module)
//! - **Event bus**: publish/subscribe over progress notifications (`event_bus` module)
//! - **HTTP**: promise-returning client over a pluggable transport (`http` module)
//! - **Templates**: template cache, harvesting and loading (`template` module)
//! - **Batch**: combined requests over named data sources (`batch` module)
//! - **Tasks**: named tasks assembled into task queues (`tasks` module)
//! - **Render**: render tree shown and hidden through tree traversal (`render` module)
//!
//! [`Runtime`] wires all of them around one scheduler from a [`RuntimeConfig`].

#![warn(rust_2018_idioms)]
#![allow(clippy::new_without_default)]

pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod http;
pub mod injector;
pub mod logging;
pub mod render;
pub mod runtime;
pub mod tasks;
pub mod template;

pub use batch::{Batch, BatchError, DataSources, SourceConfig};
pub use cache::{Cache, CacheError, CacheFactory, CacheInfo};
pub use config::{ConfigError, RuntimeConfig};
pub use error::RuntimeError;
pub use event_bus::{BusError, EventBus};
pub use http::{HttpClient, HttpRequest, MemoryTransport, Method, Transport};
pub use injector::{InjectError, Injector};
pub use render::{
    MemorySurface, Passthrough, RenderConfig, RenderFactory, RenderId, RenderNode,
    RenderRegistry, Surface, TemplateEngine, RENDER_REMOVE_EVENT,
};
pub use runtime::{services, Runtime};
pub use tasks::{TaskRegistry, TaskSpec};
pub use template::{TemplateCache, TemplateError, TemplateLoader};
