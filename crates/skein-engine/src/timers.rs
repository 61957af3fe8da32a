//! Promise-returning timeout and interval wrappers
//!
//! Both keep a record per live schedule so they can be cancelled; cancelling
//! rejects the promise with [`CANCELED_REASON`] and cancels the underlying
//! timer, which keeps the scheduler's outstanding counter balanced.

use crate::promise::{Deferred, Kernel, Promise, Resolution, CANCELED_REASON};
use crate::scheduler::{Scheduler, TimerId};
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// A live timeout or interval
#[derive(Debug, Clone)]
pub struct Scheduled {
    key: u64,
    promise: Promise,
}

impl Scheduled {
    /// Promise settled by the schedule
    pub fn promise(&self) -> &Promise {
        &self.promise
    }
}

/// One-shot delayed computation
#[derive(Clone)]
pub struct Timeout {
    kernel: Kernel,
    next_key: Rc<Cell<u64>>,
    records: Rc<RefCell<FxHashMap<u64, (TimerId, Deferred)>>>,
}

impl Timeout {
    pub fn new(kernel: Kernel) -> Self {
        Self {
            kernel,
            next_key: Rc::new(Cell::new(1)),
            records: Rc::new(RefCell::new(FxHashMap::default())),
        }
    }

    fn scheduler(&self) -> &Scheduler {
        self.kernel.scheduler()
    }

    /// Run `f` after `delay_ms`; its result settles the returned promise
    pub fn schedule<F, R>(&self, f: F, delay_ms: u64) -> Scheduled
    where
        F: FnOnce() -> Result<R, Value> + 'static,
        R: Into<Resolution>,
    {
        let key = self.next_key.get();
        self.next_key.set(key + 1);
        let deferred = self.kernel.defer();

        let settle = deferred.clone();
        let records = Rc::clone(&self.records);
        let id = self.scheduler().defer(
            move || {
                match f() {
                    Ok(value) => settle.resolve(value),
                    Err(reason) => settle.reject(reason),
                }
                records.borrow_mut().remove(&key);
            },
            delay_ms,
        );
        let promise = deferred.promise();
        self.records.borrow_mut().insert(key, (id, deferred));
        Scheduled { key, promise }
    }

    /// Cancel a timeout that has not fired yet
    pub fn cancel(&self, scheduled: &Scheduled) -> bool {
        let record = self.records.borrow_mut().remove(&scheduled.key);
        match record {
            Some((id, deferred)) => {
                deferred.reject(CANCELED_REASON);
                self.scheduler().cancel(id)
            }
            None => false,
        }
    }

    /// Number of timeouts that have neither fired nor been cancelled
    pub fn live(&self) -> usize {
        self.records.borrow().len()
    }
}

struct IntervalRecord {
    deferred: Deferred,
    /// Timer for the next tick
    timer: Cell<Option<TimerId>>,
    iteration: Cell<u64>,
    /// Ticks before fulfilling; `0` repeats until cancelled
    count: u64,
    delay_ms: u64,
}

type IntervalRecords = Rc<RefCell<FxHashMap<u64, Rc<IntervalRecord>>>>;

/// Repeating computation reported through progress notifications
#[derive(Clone)]
pub struct Interval {
    kernel: Kernel,
    next_key: Rc<Cell<u64>>,
    records: IntervalRecords,
}

impl Interval {
    pub fn new(kernel: Kernel) -> Self {
        Self {
            kernel,
            next_key: Rc::new(Cell::new(1)),
            records: Rc::new(RefCell::new(FxHashMap::default())),
        }
    }

    /// Call `f` with the 0-based iteration every `delay_ms`
    ///
    /// After `count` ticks the promise fulfills with the tick count; with
    /// `count == 0` it only settles through [`Interval::cancel`]. An error
    /// from `f` is logged and the interval keeps going.
    pub fn schedule<F>(&self, f: F, delay_ms: u64, count: u64) -> Scheduled
    where
        F: Fn(u64) -> Result<(), Value> + 'static,
    {
        let key = self.next_key.get();
        self.next_key.set(key + 1);
        let deferred = self.kernel.defer();
        let promise = deferred.promise();
        promise.progress(move |iteration| {
            f(iteration.as_u64().unwrap_or_default())?;
            Ok(iteration)
        });

        let record = Rc::new(IntervalRecord {
            deferred,
            timer: Cell::new(None),
            iteration: Cell::new(0),
            count,
            delay_ms,
        });
        self.records.borrow_mut().insert(key, Rc::clone(&record));
        arm(self.kernel.scheduler(), key, record, Rc::clone(&self.records));
        Scheduled { key, promise }
    }

    /// Stop an interval; its promise rejects with the cancellation reason
    pub fn cancel(&self, scheduled: &Scheduled) -> bool {
        let record = self.records.borrow_mut().remove(&scheduled.key);
        match record {
            Some(record) => {
                record.deferred.reject(CANCELED_REASON);
                if let Some(id) = record.timer.take() {
                    self.kernel.scheduler().cancel(id);
                }
                true
            }
            None => false,
        }
    }

    /// Number of running intervals
    pub fn live(&self) -> usize {
        self.records.borrow().len()
    }
}

fn arm(scheduler: &Scheduler, key: u64, record: Rc<IntervalRecord>, records: IntervalRecords) {
    let handle = scheduler.clone();
    let delay_ms = record.delay_ms;
    let next = Rc::clone(&record);
    let id = scheduler.defer(
        move || {
            next.timer.set(None);
            let iteration = next.iteration.get();
            next.deferred.notify(iteration);
            next.iteration.set(iteration + 1);

            if next.count > 0 && iteration + 1 >= next.count {
                next.deferred.resolve(iteration + 1);
                records.borrow_mut().remove(&key);
                return;
            }
            arm(&handle, key, next, records);
        },
        delay_ms,
    );
    record.timer.set(Some(id));
}
