//! Promise state record, deferred (write side) and continuation draining

use super::{Resolution, Status, SELF_RESOLUTION_REASON};
use crate::scheduler::Scheduler;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

type Handler = Box<dyn FnOnce(Value) -> Result<Resolution, Value>>;
type ProgressHandler = Rc<dyn Fn(Value) -> Result<Value, Value>>;

/// Handlers attached by [`Promise::then_with`]
///
/// Any handler may be omitted; a missing fulfillment or rejection handler
/// forwards the settled value or reason unchanged to the next link.
#[derive(Default)]
pub struct Callbacks {
    on_fulfilled: Option<Handler>,
    on_rejected: Option<Handler>,
    on_progress: Option<ProgressHandler>,
}

impl Callbacks {
    /// No handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle the fulfillment value
    pub fn fulfilled<F, R>(mut self, handler: F) -> Self
    where
        F: FnOnce(Value) -> Result<R, Value> + 'static,
        R: Into<Resolution>,
    {
        self.on_fulfilled = Some(Box::new(move |value| handler(value).map(Into::into)));
        self
    }

    /// Handle the rejection reason
    pub fn rejected<F, R>(mut self, handler: F) -> Self
    where
        F: FnOnce(Value) -> Result<R, Value> + 'static,
        R: Into<Resolution>,
    {
        self.on_rejected = Some(Box::new(move |reason| handler(reason).map(Into::into)));
        self
    }

    /// Handle progress notifications; the returned value is passed on to
    /// the progress listeners of the promise `then` returns
    pub fn progress<F>(mut self, handler: F) -> Self
    where
        F: Fn(Value) -> Result<Value, Value> + 'static,
    {
        self.on_progress = Some(Rc::new(handler));
        self
    }
}

/// One registered `then`: the promise it returned plus its handlers
struct Continuation {
    result: Deferred,
    callbacks: Callbacks,
}

struct PromiseState {
    status: Status,
    /// Fulfillment value or rejection reason, written once
    value: Option<Value>,
    /// Registered continuations in `then` order; `None` until the first `then`
    pending: Option<Vec<Continuation>>,
    /// A drain is already queued on the scheduler
    process_scheduled: bool,
}

struct PromiseInner {
    state: RefCell<PromiseState>,
    scheduler: Scheduler,
}

/// Read side of a deferred computation
#[derive(Clone)]
pub struct Promise {
    inner: Rc<PromiseInner>,
}

impl Promise {
    fn new(scheduler: Scheduler) -> Self {
        Self {
            inner: Rc::new(PromiseInner {
                state: RefCell::new(PromiseState {
                    status: Status::Pending,
                    value: None,
                    pending: None,
                    process_scheduled: false,
                }),
                scheduler,
            }),
        }
    }

    /// Current status
    pub fn status(&self) -> Status {
        self.inner.state.borrow().status
    }

    /// `Ok(value)` once fulfilled, `Err(reason)` once rejected
    pub fn outcome(&self) -> Option<Result<Value, Value>> {
        let state = self.inner.state.borrow();
        let value = state.value.clone().unwrap_or(Value::Null);
        match state.status {
            Status::Fulfilled => Some(Ok(value)),
            Status::Rejected => Some(Err(value)),
            Status::Pending | Status::Adopting => None,
        }
    }

    /// Fulfilled or rejected
    pub fn is_settled(&self) -> bool {
        self.status().is_settled()
    }

    /// Same underlying promise
    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Loop this promise drains on
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Register a continuation; always returns a new promise
    ///
    /// If this promise is already settled the drain is scheduled, never run
    /// inline.
    pub fn then_with(&self, callbacks: Callbacks) -> Promise {
        let result = Deferred::new(self.inner.scheduler.clone());
        let returned = result.promise();
        let settled = {
            let mut state = self.inner.state.borrow_mut();
            state
                .pending
                .get_or_insert_with(Vec::new)
                .push(Continuation { result, callbacks });
            state.status.is_settled()
        };
        if settled {
            schedule_process_queue(&self.inner);
        }
        returned
    }

    /// Chain a fulfillment handler
    pub fn then<F, R>(&self, on_fulfilled: F) -> Promise
    where
        F: FnOnce(Value) -> Result<R, Value> + 'static,
        R: Into<Resolution>,
    {
        self.then_with(Callbacks::new().fulfilled(on_fulfilled))
    }

    /// Chain a rejection handler
    pub fn catch<F, R>(&self, on_rejected: F) -> Promise
    where
        F: FnOnce(Value) -> Result<R, Value> + 'static,
        R: Into<Resolution>,
    {
        self.then_with(Callbacks::new().rejected(on_rejected))
    }

    /// Chain both a fulfillment and a rejection handler
    pub fn then_or<F, G, R, S>(&self, on_fulfilled: F, on_rejected: G) -> Promise
    where
        F: FnOnce(Value) -> Result<R, Value> + 'static,
        G: FnOnce(Value) -> Result<S, Value> + 'static,
        R: Into<Resolution>,
        S: Into<Resolution>,
    {
        self.then_with(
            Callbacks::new()
                .fulfilled(on_fulfilled)
                .rejected(on_rejected),
        )
    }

    /// Listen to progress notifications
    pub fn progress<F>(&self, on_progress: F) -> Promise
    where
        F: Fn(Value) -> Result<Value, Value> + 'static,
    {
        self.then_with(Callbacks::new().progress(on_progress))
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Promise")
            .field("status", &state.status)
            .field("value", &state.value)
            .finish()
    }
}

/// Write side of a promise: resolve, reject, notify
#[derive(Clone)]
pub struct Deferred {
    promise: Promise,
}

impl Deferred {
    pub(crate) fn new(scheduler: Scheduler) -> Self {
        Self {
            promise: Promise::new(scheduler),
        }
    }

    /// The promise this deferred controls
    pub fn promise(&self) -> Promise {
        self.promise.clone()
    }

    /// Resolve with a value or adopt an awaitable
    ///
    /// A no-op unless the promise is still plainly pending. Resolving with
    /// the promise itself rejects it with [`SELF_RESOLUTION_REASON`].
    pub fn resolve(&self, value: impl Into<Resolution>) {
        if self.promise.status() != Status::Pending {
            return;
        }
        self.resolve_unchecked(value.into());
    }

    /// Reject with a reason; a no-op unless still plainly pending
    pub fn reject(&self, reason: impl Into<Value>) {
        if self.promise.status() != Status::Pending {
            return;
        }
        self.settle(Status::Rejected, reason.into());
    }

    /// Send a progress notification to every registered continuation
    ///
    /// Only has an effect while unsettled and with at least one
    /// continuation. Delivery is deferred to the next turn.
    pub fn notify(&self, progress: impl Into<Value>) {
        let progress = progress.into();
        let targets: Vec<(Deferred, Option<ProgressHandler>)> = {
            let state = self.promise.inner.state.borrow();
            if state.status.is_settled() {
                return;
            }
            match &state.pending {
                Some(pending) if !pending.is_empty() => pending
                    .iter()
                    .map(|c| (c.result.clone(), c.callbacks.on_progress.clone()))
                    .collect(),
                _ => return,
            }
        };
        self.promise.inner.scheduler.defer(
            move || {
                for (result, handler) in targets {
                    match handler {
                        Some(handler) => match handler(progress.clone()) {
                            Ok(forwarded) => result.notify(forwarded),
                            Err(reason) => {
                                tracing::error!(%reason, "progress callback failed");
                            }
                        },
                        None => result.notify(progress.clone()),
                    }
                }
            },
            0,
        );
    }

    /// Resolution step that skips the pending check; used by adoption
    fn resolve_unchecked(&self, value: Resolution) {
        match value {
            Resolution::Value(value) => self.settle(Status::Fulfilled, value),
            Resolution::Promise(other) if other.ptr_eq(&self.promise) => {
                tracing::warn!("promise resolved with itself");
                self.settle(Status::Rejected, Value::from(SELF_RESOLUTION_REASON));
            }
            Resolution::Promise(other) => {
                self.set_status(Status::Adopting);
                let settler = Settler::new(self.clone());
                let on_value = settler.clone();
                let on_reason = settler.clone();
                other.then_with(
                    Callbacks::new()
                        .fulfilled(move |value| {
                            on_value.resolve(value);
                            Ok(())
                        })
                        .rejected(move |reason| {
                            on_reason.reject(reason);
                            Ok(())
                        })
                        .progress(move |progress| {
                            settler.notify(progress.clone());
                            Ok(progress)
                        }),
                );
            }
            Resolution::Thenable(thenable) => {
                self.set_status(Status::Adopting);
                let settler = Settler::new(self.clone());
                if let Err(reason) = thenable.then(settler.clone()) {
                    settler.reject(reason);
                }
            }
        }
    }

    fn set_status(&self, status: Status) {
        self.promise.inner.state.borrow_mut().status = status;
    }

    fn settle(&self, status: Status, value: Value) {
        {
            let mut state = self.promise.inner.state.borrow_mut();
            state.value = Some(value);
            state.status = status;
        }
        schedule_process_queue(&self.promise.inner);
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("promise", &self.promise)
            .finish()
    }
}

/// Call-once resolve/reject capability handed to an adopted awaitable
///
/// Clones share the guard: after the first `resolve` or `reject` on any of
/// them, later calls are ignored.
#[derive(Clone)]
pub struct Settler {
    deferred: Deferred,
    called: Rc<Cell<bool>>,
}

impl Settler {
    fn new(deferred: Deferred) -> Self {
        Self {
            deferred,
            called: Rc::new(Cell::new(false)),
        }
    }

    /// Settle the adopting promise with `value` (which may itself be awaitable)
    pub fn resolve(&self, value: impl Into<Resolution>) {
        if self.called.replace(true) {
            return;
        }
        self.deferred.resolve_unchecked(value.into());
    }

    /// Reject the adopting promise
    pub fn reject(&self, reason: impl Into<Value>) {
        if self.called.replace(true) {
            return;
        }
        self.deferred.settle(Status::Rejected, reason.into());
    }

    /// Forward progress to the adopting promise's listeners
    pub fn notify(&self, progress: impl Into<Value>) {
        self.deferred.notify(progress);
    }
}

fn schedule_process_queue(inner: &Rc<PromiseInner>) {
    {
        let mut state = inner.state.borrow_mut();
        if state.process_scheduled || state.pending.is_none() {
            return;
        }
        state.process_scheduled = true;
    }
    let target = Rc::clone(inner);
    inner.scheduler.defer(move || process_queue(&target), 0);
}

/// Drain the continuation list of a settled promise
fn process_queue(inner: &PromiseInner) {
    let (pending, status, value) = {
        let mut state = inner.state.borrow_mut();
        state.process_scheduled = false;
        let pending = state.pending.take().unwrap_or_default();
        let value = state.value.clone().unwrap_or(Value::Null);
        (pending, state.status, value)
    };
    debug_assert!(status.is_settled());

    for Continuation { result, callbacks } in pending {
        let handler = match status {
            Status::Fulfilled => callbacks.on_fulfilled,
            _ => callbacks.on_rejected,
        };
        match handler {
            Some(handler) => match handler(value.clone()) {
                Ok(next) => result.resolve(next),
                Err(reason) => result.reject(reason),
            },
            None if status == Status::Fulfilled => result.resolve(value.clone()),
            None => result.reject(value.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promise::Thenable;
    use serde_json::json;

    fn setup() -> (Scheduler, Deferred) {
        let scheduler = Scheduler::new();
        let deferred = Deferred::new(scheduler.clone());
        (scheduler, deferred)
    }

    #[test]
    fn test_settle_once() {
        let (scheduler, deferred) = setup();
        deferred.resolve(1);
        deferred.resolve(2);
        deferred.reject(3);
        scheduler.run_until_idle().unwrap();

        let promise = deferred.promise();
        assert_eq!(promise.status(), Status::Fulfilled);
        assert_eq!(promise.outcome(), Some(Ok(json!(1))));
    }

    #[test]
    fn test_continuations_fire_once_in_order() {
        let (scheduler, deferred) = setup();
        let promise = deferred.promise();
        let log = Rc::new(RefCell::new(Vec::new()));
        for tag in 0..3 {
            let log = Rc::clone(&log);
            promise.then(move |value| {
                log.borrow_mut().push((tag, value));
                Ok(())
            });
        }
        deferred.resolve("done");
        deferred.resolve("again");
        scheduler.run_until_idle().unwrap();

        let seen = log.borrow();
        assert_eq!(seen.len(), 3);
        assert_eq!(
            seen.iter().map(|(tag, _)| *tag).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(seen.iter().all(|(_, value)| value == &json!("done")));
    }

    #[test]
    fn test_then_never_runs_synchronously() {
        let (scheduler, deferred) = setup();
        deferred.resolve(5);
        scheduler.run_until_idle().unwrap();

        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        deferred.promise().then(move |_| {
            flag.set(true);
            Ok(())
        });
        assert!(!ran.get());
        scheduler.run_until_idle().unwrap();
        assert!(ran.get());
    }

    #[test]
    fn test_self_resolution_rejects() {
        let (scheduler, deferred) = setup();
        deferred.resolve(deferred.promise());
        scheduler.run_until_idle().unwrap();
        assert_eq!(
            deferred.promise().outcome(),
            Some(Err(json!(SELF_RESOLUTION_REASON)))
        );
    }

    #[test]
    fn test_missing_handler_forwards_value_and_reason() {
        let (scheduler, deferred) = setup();
        let forwarded = deferred.promise().catch(|_| Ok(json!("unused")));
        deferred.resolve(json!({"a": 1}));

        let failing = Deferred::new(scheduler.clone());
        let passed_reason = failing.promise().then(|_| Ok(json!("unused")));
        failing.reject("nope");

        scheduler.run_until_idle().unwrap();
        assert_eq!(forwarded.outcome(), Some(Ok(json!({"a": 1}))));
        assert_eq!(passed_reason.outcome(), Some(Err(json!("nope"))));
    }

    #[test]
    fn test_handler_error_rejects_result() {
        let (scheduler, deferred) = setup();
        let chained = deferred
            .promise()
            .then(|_| Err::<(), _>(json!("handler failed")));
        deferred.resolve(1);
        scheduler.run_until_idle().unwrap();
        assert_eq!(chained.outcome(), Some(Err(json!("handler failed"))));
    }

    #[test]
    fn test_rejection_recovered_by_handler() {
        let (scheduler, deferred) = setup();
        let recovered = deferred.promise().catch(|reason| Ok(json!({ "recovered": reason })));
        deferred.reject("bad");
        scheduler.run_until_idle().unwrap();
        assert_eq!(
            recovered.outcome(),
            Some(Ok(json!({ "recovered": "bad" })))
        );
    }

    #[test]
    fn test_adoption_of_pending_promise() {
        let (scheduler, outer) = setup();
        let inner = Deferred::new(scheduler.clone());
        outer.resolve(inner.promise());
        assert_eq!(outer.promise().status(), Status::Adopting);

        // Adopting promises ignore further settlement attempts
        outer.resolve(99);
        outer.reject("ignored");

        inner.resolve("inner value");
        scheduler.run_until_idle().unwrap();
        assert_eq!(outer.promise().outcome(), Some(Ok(json!("inner value"))));
    }

    #[test]
    fn test_adoption_chain_depth_three() {
        let (scheduler, first) = setup();
        let second = Deferred::new(scheduler.clone());
        let third = Deferred::new(scheduler.clone());
        let fourth = Deferred::new(scheduler.clone());

        first.resolve(second.promise());
        second.resolve(third.promise());
        third.resolve(fourth.promise());
        fourth.reject("deep failure");

        scheduler.run_until_idle().unwrap();
        assert_eq!(first.promise().outcome(), Some(Err(json!("deep failure"))));
    }

    struct SyncThenable(Result<Value, Value>);

    impl Thenable for SyncThenable {
        fn then(&self, settler: Settler) -> Result<(), Value> {
            match &self.0 {
                Ok(value) => {
                    settler.resolve(value.clone());
                    // Second call is swallowed by the guard
                    settler.reject("late");
                    Ok(())
                }
                Err(reason) => Err(reason.clone()),
            }
        }
    }

    #[test]
    fn test_thenable_adoption_call_once() {
        let (scheduler, deferred) = setup();
        let thenable: Rc<dyn Thenable> = Rc::new(SyncThenable(Ok(json!(7))));
        deferred.resolve(thenable);
        scheduler.run_until_idle().unwrap();
        assert_eq!(deferred.promise().outcome(), Some(Ok(json!(7))));
    }

    #[test]
    fn test_thenable_error_rejects() {
        let (scheduler, deferred) = setup();
        let thenable: Rc<dyn Thenable> =
            Rc::new(SyncThenable(Err(json!("adoption failed"))));
        deferred.resolve(thenable);
        scheduler.run_until_idle().unwrap();
        assert_eq!(
            deferred.promise().outcome(),
            Some(Err(json!("adoption failed")))
        );
    }

    #[test]
    fn test_notify_reaches_progress_handlers_asynchronously() {
        let (scheduler, deferred) = setup();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let downstream = deferred.promise().progress(move |p| {
            sink.borrow_mut().push(p.clone());
            Ok(json!({ "wrapped": p }))
        });
        let relayed = Rc::new(RefCell::new(Vec::new()));
        let relay_sink = Rc::clone(&relayed);
        downstream.progress(move |p| {
            relay_sink.borrow_mut().push(p.clone());
            Ok(p)
        });

        deferred.notify(1);
        assert!(seen.borrow().is_empty());
        scheduler.run_until_idle().unwrap();

        assert_eq!(*seen.borrow(), vec![json!(1)]);
        assert_eq!(*relayed.borrow(), vec![json!({ "wrapped": 1 })]);
    }

    #[test]
    fn test_notify_passes_through_links_without_progress_handler() {
        let (scheduler, deferred) = setup();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        deferred.promise().then(Ok).progress(move |p| {
            sink.borrow_mut().push(p.clone());
            Ok(p)
        });

        deferred.notify(5);
        scheduler.run_until_idle().unwrap();
        assert_eq!(*seen.borrow(), vec![json!(5)]);
    }

    #[test]
    fn test_notify_reaches_listeners_of_adopting_promise() {
        let (scheduler, outer) = setup();
        let inner = Deferred::new(scheduler.clone());
        outer.resolve(inner.promise());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        outer.promise().progress(move |p| {
            sink.borrow_mut().push(p.clone());
            Ok(p)
        });

        inner.notify("p");
        scheduler.run_until_idle().unwrap();
        assert_eq!(*seen.borrow(), vec![json!("p")]);
        assert_eq!(outer.promise().status(), Status::Adopting);
    }

    #[test]
    fn test_notify_after_settlement_is_ignored() {
        let (scheduler, deferred) = setup();
        let count = Rc::new(Cell::new(0));
        let counter = Rc::clone(&count);
        deferred.promise().progress(move |p| {
            counter.set(counter.get() + 1);
            Ok(p)
        });
        deferred.resolve(());
        deferred.notify("late");
        scheduler.run_until_idle().unwrap();
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_progress_handler_error_is_contained() {
        let (scheduler, deferred) = setup();
        let second = Rc::new(Cell::new(false));
        deferred.promise().progress(|_| Err(json!("listener broke")));
        let flag = Rc::clone(&second);
        deferred.promise().progress(move |p| {
            flag.set(true);
            Ok(p)
        });
        deferred.notify("tick");
        scheduler.run_until_idle().unwrap();
        assert!(second.get());
    }

    #[test]
    fn test_multiple_then_coalesce_into_one_drain() {
        let (scheduler, deferred) = setup();
        deferred.resolve(1);
        scheduler.run_until_idle().unwrap();

        let promise = deferred.promise();
        promise.then(|v| Ok(v));
        promise.then(|v| Ok(v));
        promise.then(|v| Ok(v));
        assert_eq!(scheduler.pending_count(), 1);
    }
}
