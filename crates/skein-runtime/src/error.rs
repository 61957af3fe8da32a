//! Runtime error types.

use crate::batch::BatchError;
use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::event_bus::BusError;
use crate::injector::InjectError;
use crate::render::RenderId;
use crate::template::TemplateError;
use skein_engine::{EngineError, QueueError};

/// Errors surfaced synchronously by the runtime collaborators
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Service injection failed
    #[error(transparent)]
    Inject(#[from] InjectError),

    /// Named cache misuse
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Event bus misuse
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Template lookup failed
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Batch request misuse
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// Task queue misuse
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Scheduler failure
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A task id was registered twice
    #[error("task '{id}' is already registered")]
    DuplicateTask {
        /// Task id
        id: String,
    },

    /// A task spec names a task that was never registered
    #[error("task '{id}' is not registered")]
    UnknownTask {
        /// Task id
        id: String,
    },

    /// A render node id does not belong to the registry
    #[error("unknown render node {id}")]
    UnknownRender {
        /// Node id
        id: RenderId,
    },

    /// Attaching would make a render node its own ancestor
    #[error("attaching {child} under {parent} would create a cycle")]
    RenderCycle {
        /// Requested parent
        parent: RenderId,
        /// Requested child
        child: RenderId,
    },
}
