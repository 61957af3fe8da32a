//! Sequential task queue with asynchronously gated steps
//!
//! Each task may wait on a readiness producer. Producers are started as
//! soon as the task is pushed and may settle in any order; handlers still
//! run strictly by index. A task becomes runnable when both its readiness
//! has settled and the cursor points at it; whichever happens last
//! triggers the run.
//!
//! A rejected producer never stops the queue: the task is recorded as
//! failed, its handler is skipped and the cursor moves on.

mod task;

pub use task::TaskState;

use crate::promise::{Callbacks, Promise};
use rustc_hash::FxHashSet;
use serde_json::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use task::{Readiness, Task, TaskHandler};

type Hook = Box<dyn FnOnce()>;
type NotifyHook = Box<dyn FnMut(usize) -> anyhow::Result<()>>;

/// Task queue misuse, reported synchronously
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// `run` called twice, or tasks pushed after `run`
    #[error("task queue already started")]
    AlreadyStarted,

    /// The readiness producer failed before returning a promise
    #[error("readiness producer for task {index} failed: {message}")]
    Producer {
        /// Index the task would have had
        index: usize,
        /// Producer error, with its cause chain
        message: String,
    },
}

struct QueueState {
    tasks: Vec<Task>,
    /// Next task to run; everything before it has run or been skipped
    current: usize,
    /// Indices whose readiness has settled
    ready: FxHashSet<usize>,
    before: Option<Hook>,
    after: Option<Hook>,
    notify: Option<NotifyHook>,
    started: bool,
    finished: bool,
    /// A pump loop is on the stack
    pumping: bool,
}

/// Ordered list of gated steps
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Rc<RefCell<QueueState>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(QueueState {
                tasks: Vec::new(),
                current: 0,
                ready: FxHashSet::default(),
                before: None,
                after: None,
                notify: None,
                started: false,
                finished: false,
                pumping: false,
            })),
        }
    }

    /// Append a task with no readiness producer
    pub fn push<F>(&self, handler: F) -> Result<usize, QueueError>
    where
        F: FnOnce(Value) -> anyhow::Result<()> + 'static,
    {
        let mut state = self.inner.borrow_mut();
        if state.started {
            return Err(QueueError::AlreadyStarted);
        }
        let index = state.tasks.len();
        state.tasks.push(Task::immediate(index, Box::new(handler)));
        state.ready.insert(index);
        Ok(index)
    }

    /// Append a task gated on `producer`, which is invoked right away
    ///
    /// The handler receives the producer's fulfillment value. If the
    /// producer itself fails, nothing is appended.
    pub fn push_gated<F, P>(&self, handler: F, producer: P) -> Result<usize, QueueError>
    where
        F: FnOnce(Value) -> anyhow::Result<()> + 'static,
        P: FnOnce() -> anyhow::Result<Promise>,
    {
        let index = {
            let state = self.inner.borrow();
            if state.started {
                return Err(QueueError::AlreadyStarted);
            }
            state.tasks.len()
        };
        let readiness = producer().map_err(|err| QueueError::Producer {
            index,
            message: format!("{err:#}"),
        })?;
        self.inner
            .borrow_mut()
            .tasks
            .push(Task::gated(index, Box::new(handler) as TaskHandler));

        let on_data = self.clone();
        let on_failure = self.clone();
        readiness.then_with(
            Callbacks::new()
                .fulfilled(move |data| {
                    on_data.call(index, Ok(data));
                    Ok(())
                })
                .rejected(move |reason| {
                    on_failure.call(index, Err(reason));
                    Ok(())
                }),
        );
        Ok(index)
    }

    /// Hook run by [`TaskQueue::run`] before the first task
    pub fn before<F: FnOnce() + 'static>(&self, hook: F) {
        self.inner.borrow_mut().before = Some(Box::new(hook));
    }

    /// Hook run once after the last task
    pub fn after<F: FnOnce() + 'static>(&self, hook: F) {
        self.inner.borrow_mut().after = Some(Box::new(hook));
    }

    /// Hook run with the index of every completed (or skipped) task
    pub fn notify<F>(&self, hook: F)
    where
        F: FnMut(usize) -> anyhow::Result<()> + 'static,
    {
        self.inner.borrow_mut().notify = Some(Box::new(hook));
    }

    /// Start the queue
    pub fn run(&self) -> Result<(), QueueError> {
        let before = {
            let mut state = self.inner.borrow_mut();
            if state.started {
                return Err(QueueError::AlreadyStarted);
            }
            state.started = true;
            state.before.take()
        };
        tracing::debug!(tasks = self.len(), "task queue started");
        if let Some(before) = before {
            before();
        }
        self.pump();
        Ok(())
    }

    /// Index of the task that runs next
    pub fn current_index(&self) -> usize {
        self.inner.borrow().current
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every task has run or been skipped and `after` has fired
    pub fn is_finished(&self) -> bool {
        self.inner.borrow().finished
    }

    /// State of the task at `index`
    pub fn task_state(&self, index: usize) -> Option<TaskState> {
        let state = self.inner.borrow();
        let task = state.tasks.get(index)?;
        Some(match (index < state.current, task.failed, task.readiness) {
            (true, true, _) => TaskState::Skipped,
            (true, false, _) => TaskState::Done,
            (false, _, Readiness::Waiting) => TaskState::Waiting,
            (false, true, Readiness::Settled) => TaskState::Failed,
            (false, false, Readiness::Settled) => TaskState::Ready,
        })
    }

    /// A task's readiness settled; run it if the cursor is already there
    fn call(&self, index: usize, outcome: Result<Value, Value>) {
        {
            let mut state = self.inner.borrow_mut();
            let Some(task) = state.tasks.get_mut(index) else {
                return;
            };
            task.settle(outcome);
            state.ready.insert(index);
        }
        self.pump();
    }

    /// Run tasks from the cursor for as long as they are ready
    fn pump(&self) {
        {
            let mut state = self.inner.borrow_mut();
            if !state.started || state.finished || state.pumping {
                return;
            }
            state.pumping = true;
        }

        loop {
            let step = {
                let mut state = self.inner.borrow_mut();
                let index = state.current;
                if index < state.tasks.len() && !state.ready.contains(&index) {
                    state.pumping = false;
                    return;
                }
                state.tasks.get_mut(index).map(|task| {
                    (
                        index,
                        task.handler.take(),
                        task.failed,
                        std::mem::take(&mut task.data),
                    )
                })
            };

            let Some((index, handler, failed, data)) = step else {
                self.finish();
                return;
            };

            match handler {
                Some(handler) if !failed => {
                    if let Err(err) = handler(data) {
                        tracing::error!(task = index, "task handler failed: {err:#}");
                    }
                }
                _ => tracing::debug!(task = index, "task skipped"),
            }
            self.advance(index);
        }
    }

    /// Fire `notify` for the finished task and move the cursor
    fn advance(&self, index: usize) {
        let notify = self.inner.borrow_mut().notify.take();
        if let Some(mut notify) = notify {
            if let Err(err) = notify(index) {
                tracing::error!(task = index, "task queue notify hook failed: {err:#}");
            }
            let mut state = self.inner.borrow_mut();
            if state.notify.is_none() {
                state.notify = Some(notify);
            }
        }
        self.inner.borrow_mut().current += 1;
    }

    fn finish(&self) {
        let after = {
            let mut state = self.inner.borrow_mut();
            state.finished = true;
            state.pumping = false;
            state.after.take()
        };
        tracing::debug!("task queue finished");
        if let Some(after) = after {
            after();
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("TaskQueue")
            .field("tasks", &state.tasks.len())
            .field("current", &state.current)
            .field("started", &state.started)
            .field("finished", &state.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promise::Kernel;
    use crate::scheduler::Scheduler;
    use serde_json::json;

    type Log = Rc<RefCell<Vec<String>>>;

    fn log() -> Log {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn record(log: &Log, entry: impl Into<String>) {
        log.borrow_mut().push(entry.into());
    }

    #[test]
    fn test_runs_in_index_order_despite_readiness_order() {
        let scheduler = Scheduler::new();
        let kernel = Kernel::new(scheduler.clone());
        let queue = TaskQueue::new();
        let events = log();

        let gates: Vec<_> = (0..3).map(|_| kernel.defer()).collect();
        for (i, gate) in gates.iter().enumerate() {
            let events = Rc::clone(&events);
            let promise = gate.promise();
            queue
                .push_gated(
                    move |data| {
                        record(&events, format!("run {i} {data}"));
                        Ok(())
                    },
                    move || Ok(promise),
                )
                .unwrap();
        }
        queue.run().unwrap();

        gates[0].resolve("a");
        gates[2].resolve("c");
        scheduler.run_until_idle().unwrap();
        assert_eq!(*events.borrow(), vec!["run 0 \"a\""]);
        assert_eq!(queue.task_state(2), Some(TaskState::Ready));

        gates[1].resolve("b");
        scheduler.run_until_idle().unwrap();
        assert_eq!(
            *events.borrow(),
            vec!["run 0 \"a\"", "run 1 \"b\"", "run 2 \"c\""]
        );
        assert!(queue.is_finished());
    }

    #[test]
    fn test_failed_readiness_skips_handler_but_continues() {
        let scheduler = Scheduler::new();
        let kernel = Kernel::new(scheduler.clone());
        let queue = TaskQueue::new();
        let events = log();

        let first = Rc::clone(&events);
        queue
            .push(move |_| {
                record(&first, "task 0");
                Ok(())
            })
            .unwrap();
        let second = Rc::clone(&events);
        let rejected = kernel.reject("no data");
        queue
            .push_gated(
                move |_| {
                    record(&second, "task 1");
                    Ok(())
                },
                move || Ok(rejected),
            )
            .unwrap();
        let third = Rc::clone(&events);
        queue
            .push(move |_| {
                record(&third, "task 2");
                Ok(())
            })
            .unwrap();

        queue.run().unwrap();
        scheduler.run_until_idle().unwrap();

        assert_eq!(*events.borrow(), vec!["task 0", "task 2"]);
        assert_eq!(queue.task_state(1), Some(TaskState::Skipped));
        assert_eq!(queue.task_state(2), Some(TaskState::Done));
    }

    #[test]
    fn test_handler_error_does_not_abort_queue() {
        let queue = TaskQueue::new();
        let events = log();
        queue.push(|_| anyhow::bail!("broken handler")).unwrap();
        let tail = Rc::clone(&events);
        queue
            .push(move |_| {
                record(&tail, "after failure");
                Ok(())
            })
            .unwrap();

        queue.run().unwrap();
        assert_eq!(*events.borrow(), vec!["after failure"]);
        assert!(queue.is_finished());
    }

    #[test]
    fn test_hooks_fire_in_lifecycle_order() {
        let queue = TaskQueue::new();
        let events = log();
        for i in 0..2 {
            let events = Rc::clone(&events);
            queue
                .push(move |_| {
                    record(&events, format!("task {i}"));
                    Ok(())
                })
                .unwrap();
        }
        let before = Rc::clone(&events);
        queue.before(move || record(&before, "before"));
        let notify = Rc::clone(&events);
        queue.notify(move |index| {
            record(&notify, format!("notify {index}"));
            Ok(())
        });
        let after = Rc::clone(&events);
        queue.after(move || record(&after, "after"));

        queue.run().unwrap();
        assert_eq!(
            *events.borrow(),
            vec!["before", "task 0", "notify 0", "task 1", "notify 1", "after"]
        );
    }

    #[test]
    fn test_notify_error_is_logged_not_fatal() {
        let queue = TaskQueue::new();
        let count = Rc::new(std::cell::Cell::new(0));
        for _ in 0..3 {
            queue.push(|_| Ok(())).unwrap();
        }
        let counter = Rc::clone(&count);
        queue.notify(move |_| {
            counter.set(counter.get() + 1);
            anyhow::bail!("listener failed")
        });
        queue.run().unwrap();
        assert_eq!(count.get(), 3);
        assert!(queue.is_finished());
    }

    #[test]
    fn test_waits_for_readiness_before_first_task() {
        let scheduler = Scheduler::new();
        let kernel = Kernel::new(scheduler.clone());
        let queue = TaskQueue::new();
        let gate = kernel.defer();
        let promise = gate.promise();
        let seen = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&seen);
        queue
            .push_gated(
                move |data| {
                    *sink.borrow_mut() = Some(data);
                    Ok(())
                },
                move || Ok(promise),
            )
            .unwrap();

        queue.run().unwrap();
        scheduler.run_until_idle().unwrap();
        assert_eq!(queue.task_state(0), Some(TaskState::Waiting));
        assert_eq!(queue.current_index(), 0);

        // Falsy data still counts as ready
        gate.resolve(0);
        scheduler.run_until_idle().unwrap();
        assert_eq!(*seen.borrow(), Some(json!(0)));
        assert!(queue.is_finished());
    }

    #[test]
    fn test_readiness_settled_before_run() {
        let scheduler = Scheduler::new();
        let kernel = Kernel::new(scheduler.clone());
        let queue = TaskQueue::new();
        let ran = Rc::new(std::cell::Cell::new(false));
        let flag = Rc::clone(&ran);
        let ready = kernel.when("early");
        queue
            .push_gated(
                move |_| {
                    flag.set(true);
                    Ok(())
                },
                move || Ok(ready),
            )
            .unwrap();
        scheduler.run_until_idle().unwrap();
        assert!(!ran.get());
        assert_eq!(queue.task_state(0), Some(TaskState::Ready));

        queue.run().unwrap();
        assert!(ran.get());
    }

    #[test]
    fn test_empty_queue_fires_after() {
        let queue = TaskQueue::new();
        let done = Rc::new(std::cell::Cell::new(false));
        let flag = Rc::clone(&done);
        queue.after(move || flag.set(true));
        queue.run().unwrap();
        assert!(done.get());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_run_twice_and_late_push_rejected() {
        let queue = TaskQueue::new();
        queue.run().unwrap();
        assert!(matches!(queue.run(), Err(QueueError::AlreadyStarted)));
        assert!(matches!(
            queue.push(|_| Ok(())),
            Err(QueueError::AlreadyStarted)
        ));
    }

    #[test]
    fn test_producer_failure_is_synchronous() {
        let queue = TaskQueue::new();
        let err = queue
            .push_gated(|_| Ok(()), || anyhow::bail!("no such service"))
            .unwrap_err();
        assert!(matches!(err, QueueError::Producer { index: 0, .. }));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_long_chain_of_ready_tasks() {
        let queue = TaskQueue::new();
        let count = Rc::new(std::cell::Cell::new(0usize));
        for _ in 0..10_000 {
            let counter = Rc::clone(&count);
            queue
                .push(move |_| {
                    counter.set(counter.get() + 1);
                    Ok(())
                })
                .unwrap();
        }
        queue.run().unwrap();
        assert_eq!(count.get(), 10_000);
    }
}
