//! Task queue on a virtual clock
//!
//! Timers, animation frames, microtasks, message delivery and mocked network
//! responses are all deferred onto one [`TaskQueue`]. Nothing sleeps: the
//! clock only moves when the orchestrator calls [`TaskQueue::advance`] or
//! [`TaskQueue::run_until_idle`].
//!
//! Callbacks fire in nondecreasing due time; equal due times fire in
//! registration order. Cancelling an unknown, fired or already cancelled
//! handle is a no-op.

use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::rc::Rc;

use crate::value::{Completion, Value};

/// `requestAnimationFrame` deferral
pub const FRAME_DELAY_MS: u64 = 16;

/// Intervals shorter than this are clamped so an interval can't starve the clock
pub const MIN_INTERVAL_MS: u64 = 1;

/// Handle returned by every scheduling call. Script sees it as a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u32);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<TimerId> for Value {
    fn from(id: TimerId) -> Self {
        Value::from(id.0)
    }
}

type HostTask = Rc<dyn Fn() -> Completion>;

/// What runs when a task comes due
#[derive(Clone)]
pub enum Callback {
    /// A script function, called with `this` and `args`
    Script {
        function: Value,
        this: Value,
        args: Vec<Value>,
    },
    /// Host-side work (message delivery, network completion, lifecycle)
    Host(HostTask),
}

impl Callback {
    pub fn script(function: Value, this: Value, args: Vec<Value>) -> Self {
        Callback::Script {
            function,
            this,
            args,
        }
    }

    pub fn host<F>(task: F) -> Self
    where
        F: Fn() -> Completion + 'static,
    {
        Callback::Host(Rc::new(task))
    }

    fn run(&self) -> Completion {
        match self {
            Callback::Script {
                function,
                this,
                args,
            } => function.call(this, args),
            Callback::Host(task) => task(),
        }
    }
}

struct Entry {
    callback: Callback,
    interval: Option<u64>,
}

/// Deferred callbacks keyed by virtual due time
#[derive(Default)]
pub struct TaskQueue {
    now: Cell<u64>,
    next_id: Cell<u32>,
    sequence: Cell<u64>,
    heap: RefCell<BinaryHeap<Reverse<(u64, u64, TimerId)>>>,
    entries: RefCell<HashMap<TimerId, Entry>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual milliseconds since the queue was created
    pub fn now(&self) -> u64 {
        self.now.get()
    }

    /// Run `callback` once after `delay_ms`
    pub fn schedule(&self, callback: Callback, delay_ms: u64) -> TimerId {
        self.insert(callback, delay_ms, None)
    }

    /// Run `callback` every `period_ms` until cancelled
    pub fn schedule_interval(&self, callback: Callback, period_ms: u64) -> TimerId {
        let period = period_ms.max(MIN_INTERVAL_MS);
        self.insert(callback, period, Some(period))
    }

    /// Host work after `delay_ms`
    pub fn defer<F>(&self, delay_ms: u64, task: F) -> TimerId
    where
        F: Fn() -> Completion + 'static,
    {
        self.schedule(Callback::host(task), delay_ms)
    }

    fn insert(&self, callback: Callback, delay_ms: u64, interval: Option<u64>) -> TimerId {
        let id = TimerId(self.next_id.get().wrapping_add(1));
        self.next_id.set(id.0);
        self.entries
            .borrow_mut()
            .insert(id, Entry { callback, interval });
        self.push(id, self.now().saturating_add(delay_ms));
        id
    }

    fn push(&self, id: TimerId, due: u64) {
        let sequence = self.sequence.get();
        self.sequence.set(sequence + 1);
        self.heap.borrow_mut().push(Reverse((due, sequence, id)));
    }

    /// Cancel `id`. Returns whether anything was pending.
    pub fn cancel(&self, id: TimerId) -> bool {
        self.entries.borrow_mut().remove(&id).is_some()
    }

    /// Number of live (scheduled, not cancelled) tasks
    pub fn pending(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_idle(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Due time of the earliest live task
    pub fn next_due(&self) -> Option<u64> {
        let entries = self.entries.borrow();
        self.heap
            .borrow()
            .iter()
            .filter(|Reverse((_, _, id))| entries.contains_key(id))
            .map(|Reverse((due, _, _))| *due)
            .min()
    }

    /// Pop and run the earliest task due at or before `limit`
    fn run_next(&self, limit: u64) -> bool {
        loop {
            let (due, id) = {
                let mut heap = self.heap.borrow_mut();
                match heap.peek() {
                    Some(Reverse((due, _, _))) if *due <= limit => {}
                    _ => return false,
                }
                match heap.pop() {
                    Some(Reverse((due, _, id))) => (due, id),
                    None => return false,
                }
            };

            let callback = {
                let mut entries = self.entries.borrow_mut();
                let Some(entry) = entries.get(&id) else {
                    // cancelled
                    continue;
                };
                let callback = entry.callback.clone();
                let interval = entry.interval;
                // An interval whose next run is past the end of the clock is finished
                match interval.and_then(|period| due.checked_add(period)) {
                    Some(next) => {
                        drop(entries);
                        self.push(id, next);
                    }
                    None => {
                        entries.remove(&id);
                    }
                }
                callback
            };

            self.now.set(self.now.get().max(due));
            if let Err(exception) = callback.run() {
                tracing::warn!("Task {} failed: {}", id, exception);
            }
            return true;
        }
    }

    /// Run everything already due
    pub fn run_due(&self) -> usize {
        let mut ran = 0;
        while self.run_next(self.now()) {
            ran += 1;
        }
        ran
    }

    /// Move the clock forward by `ms`, running tasks as they come due
    pub fn advance(&self, ms: u64) -> usize {
        let target = self.now().saturating_add(ms);
        let mut ran = 0;
        while self.run_next(target) {
            ran += 1;
        }
        self.now.set(target);
        ran
    }

    /// Jump from task to task until the queue is empty or `max_tasks` ran.
    ///
    /// Live intervals keep the queue busy, so the cap always applies.
    pub fn run_until_idle(&self, max_tasks: usize) -> usize {
        let mut ran = 0;
        while ran < max_tasks && self.run_next(u64::MAX) {
            ran += 1;
        }
        ran
    }

    /// Drop every pending task. The clock keeps its value.
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
        self.heap.borrow_mut().clear();
    }
}

/// Largest delay a script can ask for (signed 32-bit milliseconds)
pub const MAX_DELAY_MS: u64 = i32::MAX as u64;

/// Script delay argument to whole milliseconds.
///
/// Junk, negatives and delays past [`MAX_DELAY_MS`] mean 0, as in browsers.
pub fn delay_from(value: &Value) -> u64 {
    let ms = value.to_number();
    if ms.is_finite() && ms > 0.0 && ms <= MAX_DELAY_MS as f64 {
        ms as u64
    } else {
        0
    }
}

/// Script handle argument; anything that isn't a positive integer matches nothing
pub fn timer_id_from(value: &Value) -> Option<TimerId> {
    let n = value.to_number();
    if n.is_finite() && n >= 1.0 && n.fract() == 0.0 && n <= f64::from(u32::MAX) {
        Some(TimerId(n as u32))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Exception;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Callback) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let make = move |label: &'static str| {
            let sink = sink.clone();
            Callback::host(move || {
                sink.borrow_mut().push(label);
                Ok(Value::Undefined)
            })
        };
        (log, make)
    }

    #[test]
    fn test_shorter_delay_fires_first() {
        let queue = TaskQueue::new();
        let (log, make) = recorder();
        queue.schedule(make("slow"), 50);
        queue.schedule(make("fast"), 10);
        queue.advance(100);
        assert_eq!(*log.borrow(), vec!["fast", "slow"]);
    }

    #[test]
    fn test_equal_delays_keep_registration_order() {
        let queue = TaskQueue::new();
        let (log, make) = recorder();
        queue.schedule(make("a"), 5);
        queue.schedule(make("b"), 5);
        queue.schedule(make("c"), 0);
        queue.run_until_idle(10);
        assert_eq!(*log.borrow(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_cancelled_task_never_runs() {
        let queue = TaskQueue::new();
        let (log, make) = recorder();
        let id = queue.schedule(make("x"), 20);
        assert!(queue.cancel(id));
        queue.advance(100);
        assert!(log.borrow().is_empty());

        // Double cancel and unknown handles are quiet
        assert!(!queue.cancel(id));
        assert!(!queue.cancel(TimerId(999)));
    }

    #[test]
    fn test_advance_respects_clock() {
        let queue = TaskQueue::new();
        let (log, make) = recorder();
        queue.schedule(make("later"), 30);
        assert_eq!(queue.advance(29), 0);
        assert_eq!(queue.now(), 29);
        assert_eq!(queue.advance(1), 1);
        assert_eq!(*log.borrow(), vec!["later"]);
    }

    #[test]
    fn test_interval_reschedules_until_cancelled() {
        let queue = TaskQueue::new();
        let (log, make) = recorder();
        let id = queue.schedule_interval(make("tick"), 10);
        queue.advance(35);
        assert_eq!(log.borrow().len(), 3);
        queue.cancel(id);
        queue.advance(100);
        assert_eq!(log.borrow().len(), 3);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_faulting_task_is_contained() {
        let queue = TaskQueue::new();
        let (log, make) = recorder();
        queue.defer(0, || Err(Exception::error("boom")));
        queue.schedule(make("after"), 0);
        assert_eq!(queue.run_due(), 2);
        assert_eq!(*log.borrow(), vec!["after"]);
    }

    #[test]
    fn test_nested_scheduling_within_window() {
        let queue = Rc::new(TaskQueue::new());
        let (log, make) = recorder();
        let inner = queue.clone();
        let nested = make("nested");
        queue.defer(5, move || {
            inner.schedule(nested.clone(), 5);
            Ok(Value::Undefined)
        });
        queue.advance(10);
        assert_eq!(*log.borrow(), vec!["nested"]);
        assert_eq!(queue.now(), 10);
    }

    #[test]
    fn test_script_arguments() {
        assert_eq!(delay_from(&Value::from("25")), 25);
        assert_eq!(delay_from(&Value::from(-5)), 0);
        assert_eq!(delay_from(&Value::Undefined), 0);
        assert_eq!(timer_id_from(&Value::from(3)), Some(TimerId(3)));
        assert_eq!(timer_id_from(&Value::Null), None);
        assert_eq!(delay_from(&Value::from(1e20)), 0);
        assert_eq!(delay_from(&Value::from(2147483647.0)), MAX_DELAY_MS);
    }

    #[test]
    fn test_oversized_delays_do_not_overflow_clock() {
        let queue = TaskQueue::new();
        let (log, make) = recorder();
        queue.advance(10);
        queue.schedule(make("huge"), u64::MAX);
        queue.schedule_interval(make("tick"), u64::MAX);
        queue.advance(u64::MAX);
        assert_eq!(queue.now(), u64::MAX);
        assert_eq!(*log.borrow(), vec!["huge", "tick"]);
        assert!(queue.is_idle());
    }
}
