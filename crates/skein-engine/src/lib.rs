//! Skein Orchestration Engine
//!
//! Single-threaded building blocks for sequencing asynchronous work:
//! - **Scheduler**: deterministic timer loop with an outstanding-work counter (`scheduler` module)
//! - **Promise**: deferred/promise kernel with adoption and progress (`promise` module)
//! - **Timers**: cancellable promise-returning timeouts and intervals (`timers` module)
//! - **Queue**: ordered task queue gated on asynchronous readiness (`queue` module)
//! - **Tree**: parent-first and children-first asynchronous traversal (`tree` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use skein_engine::{Kernel, Scheduler};
//!
//! let scheduler = Scheduler::new();
//! let kernel = Kernel::new(scheduler.clone());
//!
//! let deferred = kernel.defer();
//! let doubled = deferred.promise().then(|v| Ok(v.as_i64().unwrap_or(0) * 2));
//! deferred.resolve(21);
//!
//! scheduler.run_until_idle()?;
//! assert_eq!(doubled.outcome(), Some(Ok(42.into())));
//! ```

#![warn(rust_2018_idioms)]
#![allow(clippy::new_without_default)]

// ============================================================================
// Core Modules
// ============================================================================

/// Timer loop and outstanding-work accounting
pub mod scheduler;

/// Promise/deferred kernel
pub mod promise;

/// Timeout and interval wrappers
pub mod timers;

/// Ordered asynchronous task queue
pub mod queue;

/// Asynchronous tree traversal
pub mod tree;

/// Engine errors
pub mod error;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::EngineError;
pub use promise::{
    Callbacks, Deferred, Kernel, Promise, Resolution, Settler, Status, Thenable, CANCELED_REASON,
    SELF_RESOLUTION_REASON,
};
pub use queue::{QueueError, TaskQueue, TaskState};
pub use scheduler::{ClockMode, Scheduler, SchedulerConfig, TimerId, DEFAULT_MAX_TURNS};
pub use timers::{Interval, Scheduled, Timeout};
pub use tree::{Hierarchy, TreeTraversal};

pub use serde_json::Value;
