//! Engine error types.

use crate::queue::QueueError;

/// Errors raised synchronously by the engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The loop kept producing work past its turn budget
    #[error("scheduler exceeded {limit} turns without going idle")]
    TurnLimit {
        /// Configured limit
        limit: usize,
    },

    /// Task queue misuse
    #[error("Task queue error: {0}")]
    Queue(#[from] QueueError),
}
