// Copyright 2018-2026 the Deno authors. MIT license.

use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use indexmap::IndexSet;

use crate::error::AnyError;
use crate::event_loop::EventLoop;
use crate::event_loop::TimerId;

pub type TimerErrorHandler = Rc<dyn Fn(AnyError)>;

struct TimersInner {
  event_loop: EventLoop,
  active: RefCell<IndexSet<TimerId>>,
  on_error: RefCell<Option<TimerErrorHandler>>,
  suspended: Cell<bool>,
}

/// The timer capability handed to a context. It remembers every timer it
/// armed so the owner can cancel, suspend or resume all of them at once.
#[derive(Clone)]
pub struct Timers(Rc<TimersInner>);

impl Timers {
  pub fn new(event_loop: EventLoop) -> Self {
    Self(Rc::new(TimersInner {
      event_loop,
      active: Default::default(),
      on_error: Default::default(),
      suspended: Cell::new(false),
    }))
  }

  /// Errors returned by callbacks go here instead of the log.
  pub fn set_error_handler(&self, handler: TimerErrorHandler) {
    *self.0.on_error.borrow_mut() = Some(handler);
  }

  pub fn event_loop(&self) -> &EventLoop {
    &self.0.event_loop
  }

  fn report(inner: &TimersInner, err: AnyError) {
    let handler = inner.on_error.borrow().clone();
    match handler {
      Some(handler) => handler(err),
      None => log::error!("Uncaught error in timer callback: {err:#}"),
    }
  }

  pub fn set_timeout(
    &self,
    delay: Duration,
    callback: impl FnOnce() -> Result<(), AnyError> + 'static,
  ) -> TimerId {
    let weak = Rc::downgrade(&self.0);
    let id = self.0.event_loop.set_timeout(delay, move || {
      if let Err(err) = callback()
        && let Some(inner) = weak.upgrade()
      {
        Self::report(&inner, err);
      }
    });
    self.track(id)
  }

  pub fn set_interval(
    &self,
    interval: Duration,
    callback: impl Fn() -> Result<(), AnyError> + 'static,
  ) -> TimerId {
    let weak = Rc::downgrade(&self.0);
    let id = self.0.event_loop.set_interval(interval, move || {
      if let Err(err) = callback()
        && let Some(inner) = weak.upgrade()
      {
        Self::report(&inner, err);
      }
    });
    self.track(id)
  }

  fn track(&self, id: TimerId) -> TimerId {
    let mut active = self.0.active.borrow_mut();
    // Fired one-shot timers are only pruned lazily.
    active.retain(|id| self.0.event_loop.has_timer(*id));
    active.insert(id);
    // Timers armed while suspended wait for `resume_all` too.
    if self.0.suspended.get() {
      self.0.event_loop.suspend_timer(id);
    }
    id
  }

  /// Only cancels timers armed through this capability.
  pub fn clear(&self, id: TimerId) -> bool {
    if !self.0.active.borrow_mut().shift_remove(&id) {
      return false;
    }
    self.0.event_loop.clear_timer(id)
  }

  pub fn clear_all(&self) -> usize {
    let active = std::mem::take(&mut *self.0.active.borrow_mut());
    active
      .into_iter()
      .filter(|id| self.0.event_loop.clear_timer(*id))
      .count()
  }

  pub fn suspend_all(&self) {
    self.0.suspended.set(true);
    for id in self.0.active.borrow().iter() {
      self.0.event_loop.suspend_timer(*id);
    }
  }

  pub fn resume_all(&self) {
    self.0.suspended.set(false);
    for id in self.0.active.borrow().iter() {
      self.0.event_loop.resume_timer(*id);
    }
  }

  pub fn active_count(&self) -> usize {
    self
      .0
      .active
      .borrow()
      .iter()
      .filter(|id| self.0.event_loop.has_timer(**id))
      .count()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::generic_error;
  use crate::event_loop::ManualClock;

  fn setup() -> (Rc<ManualClock>, Timers) {
    let clock = Rc::new(ManualClock::default());
    let timers = Timers::new(EventLoop::with_clock(clock.clone()));
    (clock, timers)
  }

  #[test]
  fn clear_all_cancels_only_own_timers() {
    let (clock, timers) = setup();
    let fired = Rc::new(Cell::new(0));
    let foreign = {
      let fired = fired.clone();
      timers
        .event_loop()
        .set_timeout(Duration::from_millis(5), move || {
          fired.set(fired.get() + 10)
        })
    };
    for _ in 0..3 {
      let fired = fired.clone();
      timers.set_timeout(Duration::from_millis(5), move || {
        fired.set(fired.get() + 1);
        Ok(())
      });
    }
    assert_eq!(timers.active_count(), 3);
    assert!(!timers.clear(foreign));
    assert_eq!(timers.clear_all(), 3);
    clock.advance(Duration::from_millis(5));
    timers.event_loop().run_until_idle();
    assert_eq!(fired.get(), 10);
  }

  #[test]
  fn callback_errors_reach_the_handler() {
    let (clock, timers) = setup();
    let seen = Rc::new(RefCell::new(Vec::new()));
    timers.set_error_handler({
      let seen = seen.clone();
      Rc::new(move |err: AnyError| seen.borrow_mut().push(err.to_string()))
    });
    timers.set_timeout(Duration::ZERO, || Err(generic_error("boom")));
    clock.advance(Duration::from_millis(1));
    timers.event_loop().run_until_idle();
    assert_eq!(*seen.borrow(), vec!["Error: boom".to_string()]);
  }

  #[test]
  fn suspend_and_resume() {
    let (clock, timers) = setup();
    let ticks = Rc::new(Cell::new(0));
    timers.set_interval(Duration::from_millis(10), {
      let ticks = ticks.clone();
      move || {
        ticks.set(ticks.get() + 1);
        Ok(())
      }
    });
    clock.advance(Duration::from_millis(10));
    timers.event_loop().run_until_idle();
    timers.suspend_all();
    clock.advance(Duration::from_millis(50));
    timers.event_loop().run_until_idle();
    assert_eq!(ticks.get(), 1);
    timers.resume_all();
    clock.advance(Duration::from_millis(10));
    timers.event_loop().run_until_idle();
    assert_eq!(ticks.get(), 2);
  }

  #[test]
  fn timers_armed_while_suspended_wait_for_resume() {
    let (clock, timers) = setup();
    let fired = Rc::new(Cell::new(0));
    timers.suspend_all();
    timers.set_timeout(Duration::from_millis(5), {
      let fired = fired.clone();
      move || {
        fired.set(fired.get() + 1);
        Ok(())
      }
    });
    clock.advance(Duration::from_millis(50));
    timers.event_loop().run_until_idle();
    assert_eq!(fired.get(), 0);
    timers.resume_all();
    clock.advance(Duration::from_millis(5));
    timers.event_loop().run_until_idle();
    assert_eq!(fired.get(), 1);
  }
}
