//! Deterministic timer loop
//!
//! Every deferred unit of work in the engine goes through [`Scheduler::defer`].
//! The loop owns a min-heap of deadlines; callbacks never run inside the call
//! that scheduled them, only when the loop is driven by [`Scheduler::run_next`],
//! [`Scheduler::advance_by`] or [`Scheduler::run_until_idle`].

use crate::error::EngineError;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Default upper bound on turns executed by a single `run_until_idle` call
pub const DEFAULT_MAX_TURNS: usize = 1_000_000;

type Callback = Box<dyn FnOnce()>;

/// Handle returned by [`Scheduler::defer`], used for cancellation
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// How the loop advances its clock
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum ClockMode {
    /// The clock jumps straight to the next deadline
    #[default]
    Virtual,
    /// The loop sleeps on the wall clock until the next deadline
    Realtime,
}

/// Scheduler settings
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Clock mode
    pub clock: ClockMode,
    /// Turn limit for `run_until_idle`
    pub max_turns: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            clock: ClockMode::Virtual,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }
}

/// Entry in the timer heap
struct TimerEntry {
    /// Absolute deadline in loop milliseconds
    deadline_ms: u64,
    /// Insertion order, keeps equal deadlines FIFO
    seq: u64,
    /// Timer to fire
    id: TimerId,
}

// Reverse ordering for min-heap (earliest deadline first, then lowest seq)
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline_ms
            .cmp(&self.deadline_ms)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_ms == other.deadline_ms && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

struct TimerState {
    /// Virtual clock (unused in realtime mode)
    now_ms: u64,
    next_id: u64,
    next_seq: u64,
    /// Deadlines, possibly containing cancelled ids
    queue: BinaryHeap<TimerEntry>,
    /// Callbacks of timers that have neither fired nor been cancelled
    pending: FxHashMap<TimerId, Callback>,
    /// Scheduled operations that have not completed yet
    outstanding: usize,
    drain_callbacks: Vec<Callback>,
}

struct SchedulerInner {
    state: RefCell<TimerState>,
    config: SchedulerConfig,
    epoch: Instant,
}

/// Single-threaded timer loop with outstanding-work accounting
///
/// Cloning yields another handle to the same loop.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

impl Scheduler {
    /// Create a virtual-clock scheduler with default limits
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a scheduler with explicit settings
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            inner: Rc::new(SchedulerInner {
                state: RefCell::new(TimerState {
                    now_ms: 0,
                    next_id: 1,
                    next_seq: 0,
                    queue: BinaryHeap::new(),
                    pending: FxHashMap::default(),
                    outstanding: 0,
                    drain_callbacks: Vec::new(),
                }),
                config,
                epoch: Instant::now(),
            }),
        }
    }

    /// Settings this loop was built with
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Current loop time in milliseconds
    pub fn now_ms(&self) -> u64 {
        let state = self.inner.state.borrow();
        self.clock_ms(&state)
    }

    fn clock_ms(&self, state: &TimerState) -> u64 {
        match self.inner.config.clock {
            ClockMode::Virtual => state.now_ms,
            ClockMode::Realtime => self.inner.epoch.elapsed().as_millis() as u64,
        }
    }

    /// Schedule `callback` to run `delay_ms` after now
    ///
    /// The outstanding counter is raised immediately and lowered once the
    /// callback has run or the timer has been cancelled.
    pub fn defer<F>(&self, callback: F, delay_ms: u64) -> TimerId
    where
        F: FnOnce() + 'static,
    {
        let mut state = self.inner.state.borrow_mut();
        let deadline_ms = self.clock_ms(&state).saturating_add(delay_ms);
        let id = TimerId(state.next_id);
        state.next_id += 1;
        let seq = state.next_seq;
        state.next_seq += 1;

        state.outstanding += 1;
        state.queue.push(TimerEntry {
            deadline_ms,
            seq,
            id,
        });
        state.pending.insert(id, Box::new(callback));
        tracing::trace!(timer = id.0, delay_ms, deadline_ms, "timer deferred");
        id
    }

    /// Cancel a pending timer
    ///
    /// Returns `false` if the timer already fired or was cancelled before.
    pub fn cancel(&self, id: TimerId) -> bool {
        let removed = self.inner.state.borrow_mut().pending.remove(&id);
        match removed {
            Some(callback) => {
                drop(callback);
                tracing::trace!(timer = id.0, "timer cancelled");
                self.complete_outstanding(|| {});
                true
            }
            None => false,
        }
    }

    /// Register a callback fired the next time no scheduled work remains
    ///
    /// Drain callbacks run in reverse registration order and are then cleared.
    /// A drain reached while a callback is panicking skips them; they stay
    /// queued for the next drain.
    pub fn on_drain<F>(&self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        self.inner
            .state
            .borrow_mut()
            .drain_callbacks
            .push(Box::new(callback));
    }

    /// Number of scheduled operations that have not completed
    pub fn outstanding(&self) -> usize {
        self.inner.state.borrow().outstanding
    }

    /// Number of timers waiting to fire
    pub fn pending_count(&self) -> usize {
        self.inner.state.borrow().pending.len()
    }

    /// True when nothing is waiting to fire
    pub fn is_idle(&self) -> bool {
        self.pending_count() == 0
    }

    /// Run the earliest pending timer, waiting for its deadline
    ///
    /// Returns `false` when there is nothing left to run.
    pub fn run_next(&self) -> bool {
        loop {
            let next = {
                let mut state = self.inner.state.borrow_mut();
                let Some(entry) = state.queue.pop() else {
                    return false;
                };
                // Cancelled timers leave stale heap entries behind
                state
                    .pending
                    .remove(&entry.id)
                    .map(|callback| (entry.deadline_ms, callback))
            };
            if let Some((deadline_ms, callback)) = next {
                self.wait_until(deadline_ms);
                self.complete_outstanding(callback);
                return true;
            }
        }
    }

    /// Run every timer due within the next `window_ms` and move the clock
    ///
    /// Timers scheduled by callbacks are included when their deadline still
    /// falls inside the window. Returns the number of callbacks executed.
    pub fn advance_by(&self, window_ms: u64) -> usize {
        let target_ms = self.now_ms().saturating_add(window_ms);
        let mut turns = 0;
        while self.next_deadline().is_some_and(|deadline| deadline <= target_ms) {
            if self.run_next() {
                turns += 1;
            }
        }
        self.wait_until(target_ms);
        turns
    }

    /// Drive the loop until no timers remain
    ///
    /// Fails once the configured turn limit is exceeded, which is what an
    /// unbounded interval looks like from the outside.
    pub fn run_until_idle(&self) -> Result<usize, EngineError> {
        let limit = self.inner.config.max_turns;
        let mut turns = 0;
        while self.run_next() {
            turns += 1;
            if turns >= limit && !self.is_idle() {
                tracing::warn!(limit, "scheduler turn limit reached");
                return Err(EngineError::TurnLimit { limit });
            }
        }
        Ok(turns)
    }

    /// Deadline of the earliest live timer
    fn next_deadline(&self) -> Option<u64> {
        let mut state = self.inner.state.borrow_mut();
        while let Some(entry) = state.queue.peek() {
            if state.pending.contains_key(&entry.id) {
                return Some(entry.deadline_ms);
            }
            state.queue.pop();
        }
        None
    }

    fn wait_until(&self, deadline_ms: u64) {
        match self.inner.config.clock {
            ClockMode::Virtual => {
                let mut state = self.inner.state.borrow_mut();
                state.now_ms = state.now_ms.max(deadline_ms);
            }
            ClockMode::Realtime => {
                let target = self.inner.epoch + Duration::from_millis(deadline_ms);
                let now = Instant::now();
                if target > now {
                    std::thread::sleep(target - now);
                }
            }
        }
    }

    /// Run `callback`, then lower the outstanding counter even if it panics
    fn complete_outstanding<F: FnOnce()>(&self, callback: F) {
        let _guard = OutstandingGuard { scheduler: self };
        callback();
    }

    fn release_outstanding(&self) {
        let drained = {
            let mut state = self.inner.state.borrow_mut();
            state.outstanding = state.outstanding.saturating_sub(1);
            if state.outstanding == 0 && !std::thread::panicking() {
                std::mem::take(&mut state.drain_callbacks)
            } else {
                Vec::new()
            }
        };
        if !drained.is_empty() {
            tracing::debug!(callbacks = drained.len(), "scheduler drained");
        }
        for callback in drained.into_iter().rev() {
            callback();
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Scheduler")
            .field("now_ms", &self.clock_ms(&state))
            .field("pending", &state.pending.len())
            .field("outstanding", &state.outstanding)
            .finish()
    }
}

struct OutstandingGuard<'a> {
    scheduler: &'a Scheduler,
}

impl Drop for OutstandingGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.release_outstanding();
    }
}
