//! Promise factory and combinators

use super::{Callbacks, Deferred, Promise, Resolution};
use crate::scheduler::Scheduler;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// Entry point for creating promises bound to one scheduler
#[derive(Clone, Debug)]
pub struct Kernel {
    scheduler: Scheduler,
}

impl Kernel {
    /// Create a kernel draining on `scheduler`
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    /// Scheduler continuations run on
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// New pending deferred
    pub fn defer(&self) -> Deferred {
        Deferred::new(self.scheduler.clone())
    }

    /// Promise already rejected with `reason`
    pub fn reject(&self, reason: impl Into<Value>) -> Promise {
        let deferred = self.defer();
        deferred.reject(reason);
        deferred.promise()
    }

    /// Promise already fulfilled with a plain value
    pub fn resolved(&self, value: impl Into<Value>) -> Promise {
        self.when(Resolution::Value(value.into()))
    }

    /// Normalize a value or awaitable into a promise
    pub fn when(&self, value: impl Into<Resolution>) -> Promise {
        let deferred = self.defer();
        deferred.resolve(value);
        deferred.promise()
    }

    /// Normalize `value` and attach `callbacks` to it
    pub fn when_with(&self, value: impl Into<Resolution>, callbacks: Callbacks) -> Promise {
        self.when(value).then_with(callbacks)
    }

    /// Wait for every entry; fulfills with an array in input order
    ///
    /// Rejects with the first rejection reason. An empty input fulfills
    /// with `[]`.
    pub fn all<I, R>(&self, entries: I) -> Promise
    where
        I: IntoIterator<Item = R>,
        R: Into<Resolution>,
    {
        let entries: Vec<Resolution> = entries.into_iter().map(Into::into).collect();
        self.gather(entries, None)
    }

    /// Keyed variant of [`Kernel::all`]; fulfills with an object
    pub fn all_keyed<I, K, R>(&self, entries: I) -> Promise
    where
        I: IntoIterator<Item = (K, R)>,
        K: Into<String>,
        R: Into<Resolution>,
    {
        let (keys, entries): (Vec<String>, Vec<Resolution>) = entries
            .into_iter()
            .map(|(key, entry)| (key.into(), entry.into()))
            .unzip();
        self.gather(entries, Some(keys))
    }

    fn gather(&self, entries: Vec<Resolution>, keys: Option<Vec<String>>) -> Promise {
        let deferred = self.defer();
        if entries.is_empty() {
            deferred.resolve(Gather::empty_shape(keys.is_some()));
            return deferred.promise();
        }

        let gather = Rc::new(RefCell::new(Gather {
            slots: vec![None; entries.len()],
            keys,
            remaining: entries.len(),
        }));

        for (index, entry) in entries.into_iter().enumerate() {
            let on_value = (Rc::clone(&gather), deferred.clone());
            let on_reason = (Rc::clone(&gather), deferred.clone());
            self.when(entry).then_with(
                Callbacks::new()
                    .fulfilled(move |value| {
                        let (gather, deferred) = on_value;
                        let complete = {
                            let mut gather = gather.borrow_mut();
                            if gather.slots[index].is_some() {
                                return Ok(());
                            }
                            gather.slots[index] = Some(value);
                            gather.remaining -= 1;
                            (gather.remaining == 0).then(|| gather.assemble())
                        };
                        if let Some(result) = complete {
                            deferred.resolve(result);
                        }
                        Ok(())
                    })
                    .rejected(move |reason| {
                        let (gather, deferred) = on_reason;
                        if gather.borrow().slots[index].is_some() {
                            return Ok(());
                        }
                        deferred.reject(reason);
                        Ok(())
                    }),
            );
        }
        deferred.promise()
    }
}

/// Fan-in bookkeeping for `all`
struct Gather {
    slots: Vec<Option<Value>>,
    /// Present for the keyed shape
    keys: Option<Vec<String>>,
    remaining: usize,
}

impl Gather {
    fn empty_shape(keyed: bool) -> Value {
        if keyed {
            Value::Object(Map::new())
        } else {
            Value::Array(Vec::new())
        }
    }

    fn assemble(&mut self) -> Value {
        let values = self.slots.iter_mut().map(|slot| slot.take().unwrap_or(Value::Null));
        match &self.keys {
            Some(keys) => Value::Object(keys.iter().cloned().zip(values).collect()),
            None => Value::Array(values.collect()),
        }
    }
}
