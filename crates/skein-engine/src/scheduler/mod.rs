//! Timer scheduling primitive
//!
//! A deterministic, single-threaded delay queue with an outstanding-work
//! counter. The promise kernel and everything above it hops through here.

mod timer;

pub use timer::{ClockMode, Scheduler, SchedulerConfig, TimerId, DEFAULT_MAX_TURNS};
