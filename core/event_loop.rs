// Copyright 2018-2026 the Deno authors. MIT license.

//! The single-threaded host event loop.
//!
//! Work is either a macrotask (run in FIFO order on a later turn) or a timer
//! ordered by `(deadline, sequence)`. Nothing scheduled here ever runs
//! synchronously inside the call that scheduled it.

use std::cell::Cell;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// Source of monotonic time for the event loop, measured from an arbitrary
/// origin.
pub trait Clock {
  fn now(&self) -> Duration;

  /// Moves the clock forward to `deadline` if this clock is driven by hand.
  /// Returns `false` for clocks that follow real time.
  fn advance_to(&self, _deadline: Duration) -> bool {
    false
  }
}

/// Real time, backed by `tokio::time::Instant` so paused test time applies.
pub struct SystemClock {
  origin: tokio::time::Instant,
}

impl Default for SystemClock {
  fn default() -> Self {
    Self {
      origin: tokio::time::Instant::now(),
    }
  }
}

impl Clock for SystemClock {
  fn now(&self) -> Duration {
    self.origin.elapsed()
  }
}

/// A clock that only moves when told to.
#[derive(Default)]
pub struct ManualClock {
  now: Cell<Duration>,
}

impl ManualClock {
  pub fn advance(&self, by: Duration) {
    self.now.set(self.now.get() + by);
  }
}

impl Clock for ManualClock {
  fn now(&self) -> Duration {
    self.now.get()
  }

  fn advance_to(&self, deadline: Duration) -> bool {
    if deadline > self.now.get() {
      self.now.set(deadline);
    }
    true
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    self.0.fmt(f)
  }
}

type Task = Box<dyn FnOnce()>;
type TimerKey = (Duration, u64);

enum TimerCallback {
  Once(Box<dyn FnOnce()>),
  Repeat(Rc<dyn Fn()>),
}

struct TimerEntry {
  key: TimerKey,
  /// Remaining delay while the timer is suspended.
  suspended: Option<Duration>,
  interval: Duration,
  callback: TimerCallback,
}

// Repeating timers never fire more often than this, so a zero interval cannot
// starve the loop.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

struct EventLoopInner {
  clock: Rc<dyn Clock>,
  tasks: RefCell<VecDeque<Task>>,
  queue: RefCell<BTreeMap<TimerKey, TimerId>>,
  timers: RefCell<HashMap<TimerId, TimerEntry>>,
  next_seq: Cell<u64>,
  next_timer_id: Cell<u64>,
}

#[derive(Clone)]
pub struct EventLoop(Rc<EventLoopInner>);

impl Default for EventLoop {
  fn default() -> Self {
    Self::new()
  }
}

impl EventLoop {
  pub fn new() -> Self {
    Self::with_clock(Rc::new(SystemClock::default()))
  }

  pub fn with_clock(clock: Rc<dyn Clock>) -> Self {
    Self(Rc::new(EventLoopInner {
      clock,
      tasks: Default::default(),
      queue: Default::default(),
      timers: Default::default(),
      next_seq: Cell::new(0),
      next_timer_id: Cell::new(1),
    }))
  }

  pub fn now(&self) -> Duration {
    self.0.clock.now()
  }

  /// Queues a macrotask that runs on a later turn, after every task queued
  /// before it.
  pub fn queue_task(&self, task: impl FnOnce() + 'static) {
    self.0.tasks.borrow_mut().push_back(Box::new(task));
  }

  pub fn set_timeout(
    &self,
    delay: Duration,
    callback: impl FnOnce() + 'static,
  ) -> TimerId {
    self.insert_timer(
      delay,
      Duration::ZERO,
      TimerCallback::Once(Box::new(callback)),
    )
  }

  pub fn set_interval(
    &self,
    interval: Duration,
    callback: impl Fn() + 'static,
  ) -> TimerId {
    let interval = interval.max(MIN_INTERVAL);
    self.insert_timer(
      interval,
      interval,
      TimerCallback::Repeat(Rc::new(callback)),
    )
  }

  fn insert_timer(
    &self,
    delay: Duration,
    interval: Duration,
    callback: TimerCallback,
  ) -> TimerId {
    let id = TimerId(self.0.next_timer_id.get());
    self.0.next_timer_id.set(id.0 + 1);
    let key = self.next_key(delay);
    self.0.queue.borrow_mut().insert(key, id);
    self.0.timers.borrow_mut().insert(
      id,
      TimerEntry {
        key,
        suspended: None,
        interval,
        callback,
      },
    );
    id
  }

  fn next_key(&self, delay: Duration) -> TimerKey {
    let seq = self.0.next_seq.get();
    self.0.next_seq.set(seq + 1);
    (self.now() + delay, seq)
  }

  /// Cancels a timer. Returns `false` if it already fired or was cleared.
  pub fn clear_timer(&self, id: TimerId) -> bool {
    let Some(entry) = self.0.timers.borrow_mut().remove(&id) else {
      return false;
    };
    self.0.queue.borrow_mut().remove(&entry.key);
    true
  }

  pub fn has_timer(&self, id: TimerId) -> bool {
    self.0.timers.borrow().contains_key(&id)
  }

  /// Takes a timer off the queue, remembering how much of its delay is left.
  pub fn suspend_timer(&self, id: TimerId) -> bool {
    let now = self.now();
    let mut timers = self.0.timers.borrow_mut();
    let Some(entry) = timers.get_mut(&id) else {
      return false;
    };
    if entry.suspended.is_some() {
      return false;
    }
    self.0.queue.borrow_mut().remove(&entry.key);
    entry.suspended = Some(entry.key.0.saturating_sub(now));
    true
  }

  pub fn resume_timer(&self, id: TimerId) -> bool {
    let mut timers = self.0.timers.borrow_mut();
    let Some(entry) = timers.get_mut(&id) else {
      return false;
    };
    let Some(remaining) = entry.suspended.take() else {
      return false;
    };
    entry.key = self.next_key(remaining);
    self.0.queue.borrow_mut().insert(entry.key, id);
    true
  }

  pub fn next_deadline(&self) -> Option<Duration> {
    self.0.queue.borrow().keys().next().map(|(deadline, _)| *deadline)
  }

  /// Whether any task or armed timer would keep the loop alive. Suspended
  /// timers do not count.
  pub fn has_pending(&self) -> bool {
    !self.0.tasks.borrow().is_empty() || !self.0.queue.borrow().is_empty()
  }

  /// Runs one unit of ready work: the oldest queued task, or else the
  /// earliest timer whose deadline has passed. Returns `false` if nothing was
  /// ready.
  pub fn tick(&self) -> bool {
    let task = self.0.tasks.borrow_mut().pop_front();
    if let Some(task) = task {
      task();
      return true;
    }
    self.fire_due_timer()
  }

  fn fire_due_timer(&self) -> bool {
    let now = self.now();
    let id = {
      let mut queue = self.0.queue.borrow_mut();
      match queue.first_key_value() {
        Some((key, _)) if key.0 <= now => {}
        _ => return false,
      }
      match queue.pop_first() {
        Some((_, id)) => id,
        None => return false,
      }
    };

    let callback = {
      let mut timers = self.0.timers.borrow_mut();
      let repeat = match timers.get(&id) {
        Some(TimerEntry {
          callback: TimerCallback::Repeat(callback),
          ..
        }) => Some(callback.clone()),
        Some(_) => None,
        None => return true,
      };
      match repeat {
        Some(callback) => TimerCallback::Repeat(callback),
        None => match timers.remove(&id) {
          Some(entry) => entry.callback,
          None => return true,
        },
      }
    };

    match callback {
      TimerCallback::Once(callback) => callback(),
      TimerCallback::Repeat(callback) => {
        callback();
        // Re-arm unless the callback cleared or suspended its own timer.
        let mut timers = self.0.timers.borrow_mut();
        if let Some(entry) = timers.get_mut(&id) {
          if entry.suspended.is_none() {
            entry.key = self.next_key(entry.interval);
            self.0.queue.borrow_mut().insert(entry.key, id);
          }
        }
      }
    }
    true
  }

  /// Runs everything that is ready now, including work scheduled by that
  /// work, without waiting for future deadlines.
  pub fn run_until_idle(&self) -> usize {
    let mut count = 0;
    while self.tick() {
      count += 1;
    }
    count
  }

  /// Drives the loop until no task or armed timer is left, sleeping until
  /// the next deadline in between.
  pub async fn run_event_loop(&self) {
    loop {
      self.run_until_idle();
      let Some(deadline) = self.next_deadline() else {
        if self.0.tasks.borrow().is_empty() {
          return;
        }
        continue;
      };
      let now = self.now();
      if deadline > now && !self.0.clock.advance_to(deadline) {
        tokio::time::sleep(deadline - now).await;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn manual() -> (Rc<ManualClock>, EventLoop) {
    let clock = Rc::new(ManualClock::default());
    let event_loop = EventLoop::with_clock(clock.clone());
    (clock, event_loop)
  }

  type Log = Rc<RefCell<Vec<&'static str>>>;

  fn recorder() -> (Log, impl Fn(&'static str) -> Box<dyn Fn()>) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let log2 = log.clone();
    let make = move |name: &'static str| -> Box<dyn Fn()> {
      let log = log2.clone();
      Box::new(move || log.borrow_mut().push(name))
    };
    (log, make)
  }

  #[test]
  fn tasks_run_in_order_and_never_synchronously() {
    let (_clock, event_loop) = manual();
    let (log, make) = recorder();
    let a = make("a");
    let b = make("b");
    event_loop.queue_task(move || a());
    event_loop.queue_task(move || b());
    assert!(log.borrow().is_empty());
    assert_eq!(event_loop.run_until_idle(), 2);
    assert_eq!(*log.borrow(), vec!["a", "b"]);
  }

  #[test]
  fn timers_fire_by_deadline_then_sequence() {
    let (clock, event_loop) = manual();
    let (log, make) = recorder();
    let (late, first, second) = (make("late"), make("first"), make("second"));
    event_loop.set_timeout(Duration::from_millis(20), move || late());
    event_loop.set_timeout(Duration::from_millis(10), move || first());
    event_loop.set_timeout(Duration::from_millis(10), move || second());
    event_loop.run_until_idle();
    assert!(log.borrow().is_empty());
    clock.advance(Duration::from_millis(10));
    event_loop.run_until_idle();
    assert_eq!(*log.borrow(), vec!["first", "second"]);
    assert_eq!(event_loop.next_deadline(), Some(Duration::from_millis(20)));
  }

  #[test]
  fn cleared_timer_does_not_fire() {
    let (clock, event_loop) = manual();
    let (log, make) = recorder();
    let a = make("a");
    let id = event_loop.set_timeout(Duration::ZERO, move || a());
    assert!(event_loop.clear_timer(id));
    assert!(!event_loop.clear_timer(id));
    clock.advance(Duration::from_millis(1));
    event_loop.run_until_idle();
    assert!(log.borrow().is_empty());
    assert!(!event_loop.has_pending());
  }

  #[test]
  fn interval_rearms_until_cleared_from_inside() {
    let (clock, event_loop) = manual();
    let count = Rc::new(Cell::new(0));
    let id_slot = Rc::new(Cell::new(None));
    let id = event_loop.set_interval(Duration::from_millis(5), {
      let count = count.clone();
      let id_slot = id_slot.clone();
      let event_loop = event_loop.clone();
      move || {
        count.set(count.get() + 1);
        if count.get() == 3 {
          event_loop.clear_timer(id_slot.get().unwrap());
        }
      }
    });
    id_slot.set(Some(id));
    for _ in 0..5 {
      clock.advance(Duration::from_millis(5));
      event_loop.run_until_idle();
    }
    assert_eq!(count.get(), 3);
    assert!(!event_loop.has_timer(id));
  }

  #[test]
  fn suspended_timer_keeps_remaining_delay() {
    let (clock, event_loop) = manual();
    let (log, make) = recorder();
    let a = make("a");
    let id = event_loop.set_timeout(Duration::from_millis(10), move || a());
    clock.advance(Duration::from_millis(4));
    assert!(event_loop.suspend_timer(id));
    assert!(!event_loop.has_pending());
    clock.advance(Duration::from_millis(100));
    event_loop.run_until_idle();
    assert!(log.borrow().is_empty());
    assert!(event_loop.resume_timer(id));
    assert_eq!(event_loop.next_deadline(), Some(Duration::from_millis(110)));
    clock.advance(Duration::from_millis(6));
    event_loop.run_until_idle();
    assert_eq!(*log.borrow(), vec!["a"]);
  }

  #[tokio::test(start_paused = true)]
  async fn run_event_loop_waits_for_timers() {
    let event_loop = EventLoop::new();
    let (log, make) = recorder();
    let (a, b) = (make("a"), make("b"));
    event_loop.set_timeout(Duration::from_millis(1000), move || a());
    event_loop.queue_task(move || b());
    event_loop.run_event_loop().await;
    assert_eq!(*log.borrow(), vec!["b", "a"]);
    assert!(event_loop.now() >= Duration::from_millis(1000));
  }

  #[tokio::test]
  async fn run_event_loop_advances_manual_clock() {
    let (clock, event_loop) = manual();
    let (log, make) = recorder();
    let a = make("a");
    event_loop.set_timeout(Duration::from_secs(3600), move || a());
    event_loop.run_event_loop().await;
    assert_eq!(*log.borrow(), vec!["a"]);
    assert_eq!(clock.now(), Duration::from_secs(3600));
  }
}
