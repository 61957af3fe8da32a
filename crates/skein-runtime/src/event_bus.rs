//! Named event channels over the progress channel of a deferred
//!
//! Every event name owns one never-settled deferred. Listeners attach a
//! progress handler to its promise and `post` notifies it, so delivery is
//! always asynchronous and follows registration order.

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use skein_engine::{Deferred, Kernel};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Event bus misuse
#[derive(Debug, Error)]
pub enum BusError {
    /// The event accepts a single listener and already has one
    #[error("event '{0}' is exclusive and already has a listener")]
    ExclusiveEvent(String),
}

#[derive(Default)]
struct BusState {
    channels: FxHashMap<String, Deferred>,
    exclusive: FxHashSet<String>,
}

/// Publish/subscribe hub
///
/// Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct EventBus {
    kernel: Kernel,
    state: Rc<RefCell<BusState>>,
}

impl EventBus {
    pub fn new(kernel: Kernel) -> Self {
        Self {
            kernel,
            state: Rc::new(RefCell::new(BusState::default())),
        }
    }

    /// Listen to `name`
    ///
    /// With `exclusive`, no further listener may ever be added for `name`.
    /// Handler errors are logged and do not affect other listeners.
    pub fn on<F>(&self, name: &str, handler: F, exclusive: bool) -> Result<(), BusError>
    where
        F: Fn(Value) -> anyhow::Result<()> + 'static,
    {
        let channel = {
            let mut state = self.state.borrow_mut();
            if state.exclusive.contains(name) {
                return Err(BusError::ExclusiveEvent(name.to_string()));
            }
            if exclusive {
                state.exclusive.insert(name.to_string());
            }
            state
                .channels
                .entry(name.to_string())
                .or_insert_with(|| self.kernel.defer())
                .promise()
        };

        let event = name.to_string();
        channel.progress(move |payload| {
            if let Err(err) = handler(payload.clone()) {
                tracing::error!(event = %event, "event listener failed: {err:#}");
            }
            Ok(payload)
        });
        tracing::debug!(event = name, exclusive, "event listener added");
        Ok(())
    }

    /// Deliver `payload` to every listener of `name`
    ///
    /// Posting an event nobody listens to drops it.
    pub fn post(&self, name: &str, payload: impl Into<Value>) {
        let channel = self.state.borrow().channels.get(name).cloned();
        match channel {
            Some(channel) => channel.notify(payload),
            None => tracing::trace!(event = name, "event dropped, no listeners"),
        }
    }

    /// Whether anything listens to `name`
    pub fn has_listeners(&self, name: &str) -> bool {
        self.state.borrow().channels.contains_key(name)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("EventBus")
            .field("events", &state.channels.len())
            .field("exclusive", &state.exclusive.len())
            .finish()
    }
}
