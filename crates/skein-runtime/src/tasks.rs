//! Named task registry
//!
//! Tasks are registered once under an id and assembled into
//! [`TaskQueue`]s from a list of [`TaskSpec`]s. Handlers and readiness
//! producers get the injector so they can reach shared services.

use crate::error::RuntimeError;
use crate::injector::Injector;
use rustc_hash::FxHashMap;
use serde_json::Value;
use skein_engine::{Promise, TaskQueue};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Registered task body; receives the readiness data
pub type TaskFn = Rc<dyn Fn(&Injector, Value) -> anyhow::Result<()>>;

/// Readiness producer; receives the spec's params
pub type ReadinessFn = Rc<dyn Fn(&Injector, Value) -> anyhow::Result<Promise>>;

/// One entry of a queue description
#[derive(Clone)]
pub struct TaskSpec {
    /// Registered task id
    pub id: String,
    /// Optional producer gating the task
    pub readiness: Option<ReadinessFn>,
    /// Passed to the readiness producer
    pub params: Value,
}

impl TaskSpec {
    /// Task that runs as soon as its turn comes
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            readiness: None,
            params: Value::Null,
        }
    }

    /// Gate the task on `producer(params)`
    pub fn with_readiness<F>(mut self, params: Value, producer: F) -> Self
    where
        F: Fn(&Injector, Value) -> anyhow::Result<Promise> + 'static,
    {
        self.readiness = Some(Rc::new(producer));
        self.params = params;
        self
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("id", &self.id)
            .field("gated", &self.readiness.is_some())
            .field("params", &self.params)
            .finish()
    }
}

/// Registry of task bodies by id
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Rc<RefCell<FxHashMap<String, TaskFn>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task body; ids are unique
    pub fn register<F>(&self, id: impl Into<String>, task: F) -> Result<(), RuntimeError>
    where
        F: Fn(&Injector, Value) -> anyhow::Result<()> + 'static,
    {
        let id = id.into();
        let mut tasks = self.tasks.borrow_mut();
        if tasks.contains_key(&id) {
            return Err(RuntimeError::DuplicateTask { id });
        }
        tracing::debug!(task = %id, "task registered");
        tasks.insert(id, Rc::new(task));
        Ok(())
    }

    pub fn has(&self, id: &str) -> bool {
        self.tasks.borrow().contains_key(id)
    }

    /// Build a queue from `specs`
    ///
    /// Every id is checked before any readiness producer is started, so an
    /// unknown id leaves nothing running.
    pub fn create_queue(
        &self,
        injector: &Injector,
        specs: Vec<TaskSpec>,
    ) -> Result<TaskQueue, RuntimeError> {
        let bodies = {
            let tasks = self.tasks.borrow();
            specs
                .iter()
                .map(|spec| {
                    tasks
                        .get(&spec.id)
                        .cloned()
                        .ok_or_else(|| RuntimeError::UnknownTask {
                            id: spec.id.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        let queue = TaskQueue::new();
        for (spec, body) in specs.into_iter().zip(bodies) {
            let handler = {
                let injector = injector.clone();
                move |data: Value| body(&injector, data)
            };
            match spec.readiness {
                Some(readiness) => {
                    let params = spec.params;
                    queue.push_gated(handler, || readiness(injector, params))?;
                }
                None => {
                    queue.push(handler)?;
                }
            }
        }
        Ok(queue)
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.tasks.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use skein_engine::{Kernel, Scheduler, TaskState};

    struct Fixture {
        scheduler: Scheduler,
        injector: Injector,
        registry: TaskRegistry,
        log: Rc<RefCell<Vec<String>>>,
    }

    fn fixture() -> Fixture {
        let scheduler = Scheduler::new();
        let injector = Injector::new();
        injector
            .register_instance("kernel", Kernel::new(scheduler.clone()))
            .unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        let registry = TaskRegistry::new();
        let sink = Rc::clone(&log);
        registry
            .register("record", move |_, data| {
                sink.borrow_mut().push(data.to_string());
                Ok(())
            })
            .unwrap();
        Fixture {
            scheduler,
            injector,
            registry,
            log,
        }
    }

    /// Producer resolving with its params after `params.delay` ms
    fn delayed(injector: &Injector, params: Value) -> anyhow::Result<Promise> {
        let kernel = injector.get::<Kernel>("kernel")?;
        let deferred = kernel.defer();
        let promise = deferred.promise();
        let delay = params["delay"].as_u64().unwrap_or(0);
        kernel
            .scheduler()
            .defer(move || deferred.resolve(params["value"].clone()), delay);
        Ok(promise)
    }

    #[test]
    fn test_queue_from_specs_runs_in_order() {
        let fx = fixture();
        let queue = fx
            .registry
            .create_queue(
                &fx.injector,
                vec![
                    TaskSpec::new("record").with_readiness(json!({"delay": 30, "value": "a"}), delayed),
                    TaskSpec::new("record"),
                    TaskSpec::new("record").with_readiness(json!({"delay": 5, "value": "c"}), delayed),
                ],
            )
            .unwrap();
        queue.run().unwrap();
        fx.scheduler.run_until_idle().unwrap();

        assert_eq!(*fx.log.borrow(), vec!["\"a\"", "null", "\"c\""]);
        assert!(queue.is_finished());
    }

    #[test]
    fn test_unknown_task_fails_before_starting_producers() {
        let fx = fixture();
        let started = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&started);
        let result = fx.registry.create_queue(
            &fx.injector,
            vec![
                TaskSpec::new("record").with_readiness(Value::Null, move |injector, params| {
                    *counter.borrow_mut() += 1;
                    delayed(injector, params)
                }),
                TaskSpec::new("missing"),
            ],
        );
        assert!(matches!(result, Err(RuntimeError::UnknownTask { id }) if id == "missing"));
        assert_eq!(*started.borrow(), 0);
    }

    #[test]
    fn test_duplicate_task_id() {
        let fx = fixture();
        assert!(matches!(
            fx.registry.register("record", |_, _| Ok(())),
            Err(RuntimeError::DuplicateTask { .. })
        ));
        assert!(fx.registry.has("record"));
    }

    #[test]
    fn test_producer_error_surfaces_synchronously() {
        let fx = fixture();
        let result = fx.registry.create_queue(
            &fx.injector,
            vec![TaskSpec::new("record").with_readiness(Value::Null, |injector, _| {
                injector.get::<Kernel>("no-such-service")?;
                unreachable!()
            })],
        );
        assert!(matches!(result, Err(RuntimeError::Queue(_))));
    }

    #[test]
    fn test_rejected_readiness_skips_task() {
        let fx = fixture();
        let queue = fx
            .registry
            .create_queue(
                &fx.injector,
                vec![
                    TaskSpec::new("record").with_readiness(Value::Null, |injector, _| {
                        Ok(injector.get::<Kernel>("kernel")?.reject("offline"))
                    }),
                    TaskSpec::new("record"),
                ],
            )
            .unwrap();
        queue.run().unwrap();
        fx.scheduler.run_until_idle().unwrap();

        assert_eq!(*fx.log.borrow(), vec!["null"]);
        assert_eq!(queue.task_state(0), Some(TaskState::Skipped));
        assert_eq!(queue.task_state(1), Some(TaskState::Done));
    }
}
