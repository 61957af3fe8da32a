//! Task structure and readiness state

use serde_json::Value;

pub(crate) type TaskHandler = Box<dyn FnOnce(Value) -> anyhow::Result<()>>;

/// Observable state of a task slot
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Readiness producer has not settled yet
    Waiting,
    /// Input available, waiting for its turn
    Ready,
    /// Readiness producer rejected; the handler will be skipped
    Failed,
    /// Handler ran (successfully or not)
    Done,
    /// Passed over because its input never arrived
    Skipped,
}

/// Whether the task's input has arrived
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Readiness {
    Waiting,
    Settled,
}

pub(crate) struct Task {
    pub(crate) index: usize,
    pub(crate) handler: Option<TaskHandler>,
    pub(crate) readiness: Readiness,
    /// Data delivered by the readiness producer (`null` without one)
    pub(crate) data: Value,
    /// Readiness producer rejected
    pub(crate) failed: bool,
}

impl Task {
    pub(crate) fn immediate(index: usize, handler: TaskHandler) -> Self {
        Self {
            index,
            handler: Some(handler),
            readiness: Readiness::Settled,
            data: Value::Null,
            failed: false,
        }
    }

    pub(crate) fn gated(index: usize, handler: TaskHandler) -> Self {
        Self {
            readiness: Readiness::Waiting,
            ..Self::immediate(index, handler)
        }
    }

    /// Record the producer's outcome; a rejection leaves `[]` as data
    pub(crate) fn settle(&mut self, outcome: Result<Value, Value>) {
        if self.readiness == Readiness::Settled {
            return;
        }
        self.readiness = Readiness::Settled;
        match outcome {
            Ok(data) => self.data = data,
            Err(reason) => {
                tracing::warn!(task = self.index, %reason, "readiness producer rejected, task will be skipped");
                self.failed = true;
                self.data = Value::Array(Vec::new());
            }
        }
    }
}
