//! Promise/deferred kernel
//!
//! A cooperative promise with fulfillment, rejection and progress channels.
//! Continuations are never run synchronously: settling a promise schedules a
//! drain of its continuation list on the [`Scheduler`](crate::scheduler::Scheduler).
//!
//! Values and rejection reasons are both [`serde_json::Value`]. A handler
//! returning `Err(reason)` rejects the promise produced by `then`, the same
//! way a thrown exception would in a dynamic language.

mod deferred;
mod kernel;

pub use deferred::{Callbacks, Deferred, Promise, Settler};
pub use kernel::Kernel;

use serde_json::Value;
use std::fmt;
use std::rc::Rc;

/// Rejection reason used when a promise is resolved with itself
pub const SELF_RESOLUTION_REASON: &str = "promise cannot be resolved with itself";

/// Rejection reason used by timer cancellation
pub const CANCELED_REASON: &str = "canceled";

/// Settlement state of a promise
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    /// Not settled, not following another awaitable
    Pending,
    /// Not settled, waiting on the awaitable it was resolved with
    Adopting,
    /// Settled with a value
    Fulfilled,
    /// Settled with a reason
    Rejected,
}

impl Status {
    /// Numeric status code (`0`, `-1`, `1`, `2`)
    pub fn code(self) -> i8 {
        match self {
            Status::Pending => 0,
            Status::Adopting => -1,
            Status::Fulfilled => 1,
            Status::Rejected => 2,
        }
    }

    /// Fulfilled or rejected
    pub fn is_settled(self) -> bool {
        self.code() > 0
    }
}

/// Something a promise can be resolved with
///
/// The awaitable check happens once, when the resolution is built, instead
/// of probing for a `then` member at settle time.
#[derive(Clone)]
pub enum Resolution {
    /// Plain value, fulfills immediately
    Value(Value),
    /// Another kernel promise, adopted
    Promise(Promise),
    /// Foreign awaitable, adopted through [`Thenable::then`]
    Thenable(Rc<dyn Thenable>),
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Promise(promise) => f.debug_tuple("Promise").field(promise).finish(),
            Resolution::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}

impl From<Value> for Resolution {
    fn from(value: Value) -> Self {
        Resolution::Value(value)
    }
}

impl From<Promise> for Resolution {
    fn from(promise: Promise) -> Self {
        Resolution::Promise(promise)
    }
}

impl From<&Promise> for Resolution {
    fn from(promise: &Promise) -> Self {
        Resolution::Promise(promise.clone())
    }
}

impl From<Rc<dyn Thenable>> for Resolution {
    fn from(thenable: Rc<dyn Thenable>) -> Self {
        Resolution::Thenable(thenable)
    }
}

impl From<()> for Resolution {
    fn from(_: ()) -> Self {
        Resolution::Value(Value::Null)
    }
}

macro_rules! resolution_from_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Resolution {
                fn from(value: $ty) -> Self {
                    Resolution::Value(Value::from(value))
                }
            }
        )*
    };
}

resolution_from_value!(bool, i32, i64, u32, u64, usize, f64, String, &str);

/// A foreign awaitable the kernel can adopt
///
/// `then` receives a [`Settler`] whose resolve/reject pair may be used at
/// most once between them. Returning `Err` rejects the adopting promise,
/// unless the settler was already used.
pub trait Thenable {
    /// Register interest in this awaitable's outcome
    fn then(&self, settler: Settler) -> Result<(), Value>;
}
