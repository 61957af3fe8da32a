//! Service injector
//!
//! A registry of named singleton services. Factories receive the injector
//! explicitly and pull their own dependencies through [`Injector::get`];
//! each service is built at most once, on first request.
//!
//! While a service is being built its name sits on the resolution path, so
//! a factory that (directly or transitively) asks for itself fails with
//! [`InjectError::CircularDependency`] instead of recursing.

use rustc_hash::FxHashMap;
use serde_json::Value;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Errors raised while registering or resolving services
#[derive(Debug, Error)]
pub enum InjectError {
    /// Nothing registered under this name
    #[error("service '{0}' does not exist")]
    MissingService(String),

    /// A service depends on itself
    #[error("circular dependency while creating service: {path}")]
    CircularDependency {
        /// Resolution path, outermost first
        path: String,
    },

    /// A name was registered twice
    #[error("service '{0}' is already registered")]
    DuplicateService(String),

    /// The service exists but has a different type
    #[error("service '{name}' is not a {expected}")]
    TypeMismatch {
        /// Service name
        name: String,
        /// Requested type
        expected: &'static str,
    },

    /// The factory itself failed
    #[error("factory for service '{name}' failed: {message}")]
    Factory {
        /// Service name
        name: String,
        /// Factory error, with its cause chain
        message: String,
    },
}

type Instance = Rc<dyn Any>;
type Factory = Rc<dyn Fn(&Injector) -> anyhow::Result<Instance>>;

struct InjectorState {
    factories: FxHashMap<String, Factory>,
    instances: FxHashMap<String, Instance>,
    /// Services currently being built, outermost first
    path: Vec<String>,
}

/// Registry of named singleton services
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct Injector {
    state: Rc<RefCell<InjectorState>>,
}

impl Injector {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(InjectorState {
                factories: FxHashMap::default(),
                instances: FxHashMap::default(),
                path: Vec::new(),
            })),
        }
    }

    /// Register a lazily built service
    pub fn register<T, F>(&self, name: impl Into<String>, factory: F) -> Result<(), InjectError>
    where
        T: 'static,
        F: Fn(&Injector) -> anyhow::Result<T> + 'static,
    {
        let name = name.into();
        let mut state = self.state.borrow_mut();
        if state.factories.contains_key(&name) || state.instances.contains_key(&name) {
            return Err(InjectError::DuplicateService(name));
        }
        tracing::debug!(service = %name, "service registered");
        let build: Factory = Rc::new(move |injector: &Injector| -> anyhow::Result<Instance> {
            Ok(Rc::new(factory(injector)?))
        });
        state.factories.insert(name, build);
        Ok(())
    }

    /// Register an already built service
    pub fn register_instance<T: 'static>(
        &self,
        name: impl Into<String>,
        instance: T,
    ) -> Result<(), InjectError> {
        let name = name.into();
        let mut state = self.state.borrow_mut();
        if state.factories.contains_key(&name) || state.instances.contains_key(&name) {
            return Err(InjectError::DuplicateService(name));
        }
        tracing::debug!(service = %name, "service instance registered");
        state.instances.insert(name, Rc::new(instance));
        Ok(())
    }

    /// Whether a service is registered, built or not
    pub fn has(&self, name: &str) -> bool {
        let state = self.state.borrow();
        state.factories.contains_key(name) || state.instances.contains_key(name)
    }

    /// Fetch a service, building it on first use
    pub fn get<T: 'static>(&self, name: &str) -> Result<Rc<T>, InjectError> {
        let instance = self.instance(name)?;
        instance
            .downcast::<T>()
            .map_err(|_| InjectError::TypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Call `f` with this injector and the caller's arguments
    pub fn invoke<F, R>(&self, args: Value, f: F) -> R
    where
        F: FnOnce(&Injector, Value) -> R,
    {
        f(self, args)
    }

    fn instance(&self, name: &str) -> Result<Instance, InjectError> {
        let factory = {
            let mut state = self.state.borrow_mut();
            if let Some(instance) = state.instances.get(name) {
                return Ok(Rc::clone(instance));
            }
            if state.path.iter().any(|entry| entry == name) {
                let mut cycle = state.path.clone();
                cycle.push(name.to_string());
                return Err(InjectError::CircularDependency {
                    path: cycle.join(" -> "),
                });
            }
            let factory = state
                .factories
                .get(name)
                .cloned()
                .ok_or_else(|| InjectError::MissingService(name.to_string()))?;
            state.path.push(name.to_string());
            factory
        };

        let built = factory(self);
        let mut state = self.state.borrow_mut();
        state.path.pop();
        match built {
            Ok(instance) => {
                tracing::trace!(service = %name, "service created");
                state.instances.insert(name.to_string(), Rc::clone(&instance));
                Ok(instance)
            }
            // A nested injection error is reported as-is
            Err(err) => match err.downcast::<InjectError>() {
                Ok(inner) => Err(inner),
                Err(err) => Err(InjectError::Factory {
                    name: name.to_string(),
                    message: format!("{err:#}"),
                }),
            },
        }
    }
}

impl Default for Injector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Injector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Injector")
            .field("registered", &(state.factories.len() + state.instances.len()))
            .field("created", &state.instances.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    struct Config {
        name: &'static str,
    }

    struct Greeter {
        config: Rc<Config>,
    }

    #[test]
    fn test_singleton_per_name() {
        let injector = Injector::new();
        let built = Rc::new(Cell::new(0));
        let counter = Rc::clone(&built);
        injector
            .register("config", move |_| {
                counter.set(counter.get() + 1);
                Ok(Config { name: "skein" })
            })
            .unwrap();

        let first = injector.get::<Config>("config").unwrap();
        let second = injector.get::<Config>("config").unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(built.get(), 1);
        assert_eq!(first.name, "skein");
    }

    #[test]
    fn test_factory_resolves_dependencies() {
        let injector = Injector::new();
        injector.register_instance("config", Config { name: "dep" }).unwrap();
        injector
            .register("greeter", |injector| {
                Ok(Greeter {
                    config: injector.get::<Config>("config")?,
                })
            })
            .unwrap();

        let greeter = injector.get::<Greeter>("greeter").unwrap();
        assert_eq!(greeter.config.name, "dep");
    }

    #[test]
    fn test_missing_service() {
        let injector = Injector::new();
        assert!(matches!(
            injector.get::<Config>("nope"),
            Err(InjectError::MissingService(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_duplicate_registration() {
        let injector = Injector::new();
        injector.register_instance("x", 1_u32).unwrap();
        assert!(matches!(
            injector.register("x", |_| Ok(2_u32)),
            Err(InjectError::DuplicateService(_))
        ));
        assert!(matches!(
            injector.register_instance("x", 3_u32),
            Err(InjectError::DuplicateService(_))
        ));
    }

    #[test]
    fn test_circular_dependency_reports_path() {
        let injector = Injector::new();
        injector
            .register("a", |injector| Ok(injector.get::<u32>("b")?))
            .unwrap();
        injector
            .register("b", |injector| Ok(injector.get::<u32>("a")?))
            .unwrap();

        match injector.get::<Rc<u32>>("a") {
            Err(InjectError::CircularDependency { path }) => assert_eq!(path, "a -> b -> a"),
            other => panic!("expected circular dependency, got {:?}", other.err()),
        }
        // Path is unwound after the failure
        assert!(matches!(
            injector.get::<Rc<u32>>("b"),
            Err(InjectError::CircularDependency { path }) if path == "b -> a -> b"
        ));
    }

    #[test]
    fn test_failed_factory_is_not_cached() {
        let injector = Injector::new();
        let attempts = Rc::new(Cell::new(0));
        let counter = Rc::clone(&attempts);
        injector
            .register("flaky", move |_| {
                counter.set(counter.get() + 1);
                if counter.get() == 1 {
                    anyhow::bail!("not yet");
                }
                Ok(42_u32)
            })
            .unwrap();

        assert!(matches!(
            injector.get::<u32>("flaky"),
            Err(InjectError::Factory { message, .. }) if message == "not yet"
        ));
        assert_eq!(*injector.get::<u32>("flaky").unwrap(), 42);
        assert_eq!(attempts.get(), 2);
    }

    #[test]
    fn test_type_mismatch() {
        let injector = Injector::new();
        injector.register_instance("n", 5_u32).unwrap();
        assert!(matches!(
            injector.get::<String>("n"),
            Err(InjectError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_invoke_passes_injector_and_args() {
        let injector = Injector::new();
        injector.register_instance("base", 10_i64).unwrap();
        let total = injector.invoke(json!(5), |injector, args| -> Result<i64, InjectError> {
            Ok(*injector.get::<i64>("base")? + args.as_i64().unwrap_or(0))
        });
        assert_eq!(total.unwrap(), 15);
        assert!(injector.has("base"));
        assert!(!injector.has("other"));
    }
}
