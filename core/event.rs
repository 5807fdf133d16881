// Copyright 2018-2026 the Deno authors. MIT license.

use std::cell::Cell;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::AnyError;
use crate::value::Value;

type ListenerFn = dyn Fn(&[Value]) -> Result<(), AnyError>;

/// A listener callback, compared by identity so it can be removed again.
#[derive(Clone)]
pub struct EventListener(Rc<ListenerFn>);

impl EventListener {
  pub fn new(f: impl Fn(&[Value]) -> Result<(), AnyError> + 'static) -> Self {
    Self(Rc::new(f))
  }

  pub fn call(&self, args: &[Value]) -> Result<(), AnyError> {
    (self.0)(args)
  }

  pub fn ptr_eq(&self, other: &EventListener) -> bool {
    Rc::ptr_eq(&self.0, &other.0)
  }
}

impl fmt::Debug for EventListener {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.write_str("[EventListener]")
  }
}

struct Registration {
  listener: EventListener,
  once: bool,
  fired: Cell<bool>,
}

pub type ListenerErrorHandler = Rc<dyn Fn(&str, AnyError)>;

#[derive(Default)]
struct EmitterInner {
  listeners: RefCell<IndexMap<String, Vec<Rc<Registration>>>>,
  on_error: RefCell<Option<ListenerErrorHandler>>,
}

/// Named-event dispatcher shared by pipes, workers and content scopes.
#[derive(Clone, Default)]
pub struct EventEmitter(Rc<EmitterInner>);

impl EventEmitter {
  pub fn new() -> Self {
    Self::default()
  }

  /// Errors returned by listeners are passed here. Without a handler they
  /// are logged.
  pub fn set_error_handler(&self, handler: ListenerErrorHandler) {
    *self.0.on_error.borrow_mut() = Some(handler);
  }

  pub fn on(&self, event: &str, listener: EventListener) {
    self.add(event, listener, false)
  }

  pub fn once(&self, event: &str, listener: EventListener) {
    self.add(event, listener, true)
  }

  fn add(&self, event: &str, listener: EventListener, once: bool) {
    self
      .0
      .listeners
      .borrow_mut()
      .entry(event.to_string())
      .or_default()
      .push(Rc::new(Registration {
        listener,
        once,
        fired: Cell::new(false),
      }));
  }

  /// Removes the first registration of `listener` for `event`.
  pub fn off(&self, event: &str, listener: &EventListener) -> bool {
    let mut listeners = self.0.listeners.borrow_mut();
    let Some(registrations) = listeners.get_mut(event) else {
      return false;
    };
    let Some(index) = registrations
      .iter()
      .position(|r| r.listener.ptr_eq(listener))
    else {
      return false;
    };
    registrations.remove(index);
    if registrations.is_empty() {
      listeners.shift_remove(event);
    }
    true
  }

  /// Removes every listener for `event`, or for all events when `None`.
  pub fn remove_all(&self, event: Option<&str>) {
    let mut listeners = self.0.listeners.borrow_mut();
    match event {
      Some(event) => {
        listeners.shift_remove(event);
      }
      None => listeners.clear(),
    }
  }

  pub fn listener_count(&self, event: &str) -> usize {
    self
      .0
      .listeners
      .borrow()
      .get(event)
      .map(|r| r.len())
      .unwrap_or(0)
  }

  pub fn has_listener_for(&self, event: &str) -> bool {
    self.listener_count(event) > 0
  }

  /// Invokes the listeners registered for `event` when dispatch starts.
  /// Listeners added or removed by a listener do not change the current
  /// dispatch. Returns the number of listeners invoked.
  pub fn emit(&self, event: &str, args: &[Value]) -> usize {
    let snapshot = match self.0.listeners.borrow().get(event) {
      Some(registrations) => registrations.clone(),
      None => return 0,
    };
    let mut invoked = 0;
    for registration in snapshot {
      if registration.once {
        if registration.fired.replace(true) {
          continue;
        }
        self.remove_registration(event, &registration);
      }
      invoked += 1;
      if let Err(err) = registration.listener.call(args) {
        self.report(event, err);
      }
    }
    invoked
  }

  fn remove_registration(&self, event: &str, registration: &Rc<Registration>) {
    let mut listeners = self.0.listeners.borrow_mut();
    if let Some(registrations) = listeners.get_mut(event) {
      registrations.retain(|r| !Rc::ptr_eq(r, registration));
      if registrations.is_empty() {
        listeners.shift_remove(event);
      }
    }
  }

  fn report(&self, event: &str, err: AnyError) {
    let handler = self.0.on_error.borrow().clone();
    match handler {
      Some(handler) => handler(event, err),
      None => log::error!("Uncaught error in `{event}` listener: {err:#}"),
    }
  }
}
