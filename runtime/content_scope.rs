// Copyright 2018-2026 the Deno authors. MIT license.

//! The global surface of a content script.
//!
//! A content script runs in a restricted context and only reaches its worker
//! through the content end of the worker's pipe. Everything here degrades to
//! a no-op once the worker is destroyed: sends on the closed pipe are
//! dropped and the timers have been cleared.

use std::rc::Rc;
use std::str::FromStr;
use std::time::Duration;

use jetpack_core::AnyError;
use jetpack_core::Console;
use jetpack_core::ConsoleLevel;
use jetpack_core::CoreError;
use jetpack_core::EventEmitter;
use jetpack_core::EventListener;
use jetpack_core::ExecutionContext;
use jetpack_core::ListenerErrorHandler;
use jetpack_core::Object;
use jetpack_core::PipeEnd;
use jetpack_core::TimerId;
use jetpack_core::Timers;
use jetpack_core::Value;

/// `self.postMessage` traffic.
pub const MESSAGE_CHANNEL: &str = "message";
/// `self.port` traffic: `[name, ...args]`.
pub const EVENT_CHANNEL: &str = "event";
/// Console calls forwarded to the host: `[level, message]`.
pub const CONSOLE_CHANNEL: &str = "console";

pub type ContentScript = Rc<dyn Fn(&ContentScope) -> Result<(), AnyError>>;

pub fn content_script(
  f: impl Fn(&ContentScope) -> Result<(), AnyError> + 'static,
) -> ContentScript {
  Rc::new(f)
}

/// Splits a port message into its event name and arguments.
pub(crate) fn split_port_message(args: &[Value]) -> Option<(&str, &[Value])> {
  let (name, rest) = args.split_first()?;
  Some((name.as_str()?, rest))
}

/// Console whose output crosses the pipe to the host console.
pub(crate) fn pipe_console(name: &str, pipe: &PipeEnd) -> Console {
  let pipe = pipe.clone();
  Console::with_sink(
    name,
    Rc::new(move |level: ConsoleLevel, message: &str| {
      if pipe
        .send(CONSOLE_CHANNEL, &[level.as_str().into(), message.into()])
        .is_err()
      {
        log::trace!("dropping console output of a destroyed worker");
      }
    }),
  )
}

/// Parses a console message received from the content side.
pub(crate) fn parse_console_message(
  args: &[Value],
) -> Option<(ConsoleLevel, String)> {
  let level = ConsoleLevel::from_str(args.first()?.as_str()?).ok()?;
  Some((level, Console::format_args(&args[1..])))
}

/// `self.port` inside the content script.
#[derive(Clone)]
pub struct ContentPort {
  pipe: PipeEnd,
  events: EventEmitter,
}

impl ContentPort {
  fn new(pipe: PipeEnd) -> Self {
    let events = EventEmitter::new();
    pipe.on(EVENT_CHANNEL, {
      let events = events.clone();
      EventListener::new(move |args| {
        if let Some((name, rest)) = split_port_message(args) {
          events.emit(name, rest);
        }
        Ok(())
      })
    });
    Self { pipe, events }
  }

  pub fn on(&self, event: &str, listener: EventListener) {
    if !self.pipe.is_closed() {
      self.events.on(event, listener);
    }
  }

  pub fn once(&self, event: &str, listener: EventListener) {
    if !self.pipe.is_closed() {
      self.events.once(event, listener);
    }
  }

  pub fn remove_listener(&self, event: &str, listener: &EventListener) -> bool {
    self.events.off(event, listener)
  }

  pub fn has_listener_for(&self, event: &str) -> bool {
    self.events.has_listener_for(event)
  }

  pub fn emit(&self, event: &str, args: &[Value]) {
    let mut message = Vec::with_capacity(args.len() + 1);
    message.push(Value::from(event));
    message.extend_from_slice(args);
    if self.pipe.send(EVENT_CHANNEL, &message).is_err() {
      log::trace!("port.emit(\"{event}\") after detach ignored");
    }
  }
}

/// The `self` object of a content script.
#[derive(Clone)]
pub struct ContentSelf {
  pipe: PipeEnd,
  port: ContentPort,
  options: Value,
}

fn is_reserved(event: &str) -> bool {
  let reserved = event == EVENT_CHANNEL || event == CONSOLE_CHANNEL;
  if reserved {
    log::warn!("`self.on(\"{event}\")` is reserved and was ignored");
  }
  reserved
}

impl ContentSelf {
  /// Listens for `message`, `pagehide`, `pageshow` or `detach`. The
  /// channels carrying port events and console output are not exposed.
  pub fn on(&self, event: &str, listener: EventListener) {
    if !is_reserved(event) {
      self.pipe.on(event, listener);
    }
  }

  pub fn once(&self, event: &str, listener: EventListener) {
    if !is_reserved(event) {
      self.pipe.once(event, listener);
    }
  }

  pub fn remove_listener(&self, event: &str, listener: &EventListener) -> bool {
    self.pipe.off(event, listener)
  }

  pub fn post_message(&self, data: impl Into<Value>) {
    if self.pipe.send(MESSAGE_CHANNEL, &[data.into()]).is_err() {
      log::trace!("postMessage after detach ignored");
    }
  }

  pub fn port(&self) -> &ContentPort {
    &self.port
  }

  /// Frozen copy of the worker's `contentScriptOptions`.
  pub fn options(&self) -> &Value {
    &self.options
  }
}

struct ContentScopeInner {
  context: ExecutionContext,
  this: ContentSelf,
  console: Console,
  timers: Timers,
  window: Object,
}

/// What a content script sees as its global scope.
#[derive(Clone)]
pub struct ContentScope(Rc<ContentScopeInner>);

impl ContentScope {
  pub(crate) fn new(
    context: ExecutionContext,
    pipe: PipeEnd,
    console: Console,
    timers: Timers,
    window: Object,
    options: Value,
  ) -> Self {
    // Errors thrown from timer callbacks are reported, never propagated.
    timers.set_error_handler({
      let console = console.clone();
      Rc::new(move |err: AnyError| console.exception(&err))
    });
    let port = ContentPort::new(pipe.clone());
    Self(Rc::new(ContentScopeInner {
      context,
      this: ContentSelf {
        pipe,
        port,
        options,
      },
      console,
      timers,
      window,
    }))
  }

  pub fn self_(&self) -> &ContentSelf {
    &self.0.this
  }

  pub fn port(&self) -> &ContentPort {
    &self.0.this.port
  }

  pub fn console(&self) -> &Console {
    &self.0.console
  }

  pub fn window(&self) -> &Object {
    &self.0.window
  }

  pub fn context(&self) -> &ExecutionContext {
    &self.0.context
  }

  pub fn global(&self, name: &str) -> Result<Value, CoreError> {
    self.0.context.get(name)
  }

  pub fn set_global(
    &self,
    name: &str,
    value: impl Into<Value>,
  ) -> Result<(), CoreError> {
    self.0.context.set(name, value.into())
  }

  pub fn set_timeout(
    &self,
    delay: Duration,
    callback: impl FnOnce() -> Result<(), AnyError> + 'static,
  ) -> TimerId {
    self.0.timers.set_timeout(delay, callback)
  }

  pub fn set_interval(
    &self,
    interval: Duration,
    callback: impl Fn() -> Result<(), AnyError> + 'static,
  ) -> TimerId {
    self.0.timers.set_interval(interval, callback)
  }

  pub fn clear_timeout(&self, id: TimerId) -> bool {
    self.0.timers.clear(id)
  }

  pub fn clear_interval(&self, id: TimerId) -> bool {
    self.0.timers.clear(id)
  }

  /// Receives errors returned by the script's `self` and `self.port`
  /// listeners.
  pub(crate) fn set_error_handler(&self, handler: ListenerErrorHandler) {
    self.0.this.pipe.set_error_handler(handler.clone());
    self.0.this.port.events.set_error_handler(handler);
  }

  /// Cuts the content side loose: listeners go away and further sends are
  /// dropped.
  pub(crate) fn close(&self) {
    self.0.this.port.events.remove_all(None);
    self.0.this.pipe.close();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use jetpack_core::Capabilities;
  use jetpack_core::ContextFactory;
  use jetpack_core::ContextOptions;
  use jetpack_core::EventLoop;
  use jetpack_core::ManualClock;
  use jetpack_core::create_pipe;
  use std::cell::RefCell;

  fn scope() -> (EventLoop, Rc<ManualClock>, PipeEnd, ContentScope) {
    let clock = Rc::new(ManualClock::default());
    let event_loop = EventLoop::with_clock(clock.clone());
    let (host, content) = create_pipe(&event_loop, "test");
    let context = ContextFactory::new()
      .create(
        ContextOptions {
          label: "content".to_string(),
          restricted: true,
        },
        Capabilities::default(),
      )
      .unwrap();
    let console = pipe_console("content", &content);
    let scope = ContentScope::new(
      context,
      content,
      console,
      Timers::new(event_loop.clone()),
      Object::new(),
      Value::Null,
    );
    (event_loop, clock, host, scope)
  }

  fn collect(end: &PipeEnd, event: &str) -> Rc<RefCell<Vec<Vec<Value>>>> {
    let received = Rc::new(RefCell::new(Vec::new()));
    end.on(event, {
      let received = received.clone();
      EventListener::new(move |args| {
        received.borrow_mut().push(args.to_vec());
        Ok(())
      })
    });
    received
  }

  #[test]
  fn port_and_message_channels_stay_apart() {
    let (event_loop, _clock, host, scope) = scope();
    let port_log = Rc::new(RefCell::new(Vec::new()));
    scope.port().on("message", {
      let port_log = port_log.clone();
      EventListener::new(move |args| {
        port_log.borrow_mut().push(args.to_vec());
        Ok(())
      })
    });
    let messages = Rc::new(RefCell::new(Vec::new()));
    scope.self_().on(MESSAGE_CHANNEL, {
      let messages = messages.clone();
      EventListener::new(move |args| {
        messages.borrow_mut().push(args.to_vec());
        Ok(())
      })
    });

    host
      .send(EVENT_CHANNEL, &["message".into(), "via port".into()])
      .unwrap();
    host.send(MESSAGE_CHANNEL, &["direct".into()]).unwrap();
    event_loop.run_until_idle();
    assert_eq!(*port_log.borrow(), vec![vec![Value::from("via port")]]);
    assert_eq!(*messages.borrow(), vec![vec![Value::from("direct")]]);

    let events = collect(&host, EVENT_CHANNEL);
    scope.port().emit("ping", &[1.into()]);
    event_loop.run_until_idle();
    assert_eq!(
      *events.borrow(),
      vec![vec![Value::from("ping"), Value::from(1)]]
    );
  }

  #[test]
  fn transport_channels_are_not_exposed_to_self() {
    let (event_loop, _clock, host, scope) = scope();
    let raw = Rc::new(RefCell::new(Vec::new()));
    for channel in [EVENT_CHANNEL, CONSOLE_CHANNEL] {
      let raw = raw.clone();
      scope.self_().on(
        channel,
        EventListener::new(move |args| {
          raw.borrow_mut().push(args.to_vec());
          Ok(())
        }),
      );
    }
    let pings = Rc::new(RefCell::new(Vec::new()));
    scope.port().on("ping", {
      let pings = pings.clone();
      EventListener::new(move |args| {
        pings.borrow_mut().push(args.to_vec());
        Ok(())
      })
    });

    host.send(EVENT_CHANNEL, &["ping".into(), 1.into()]).unwrap();
    host.send(CONSOLE_CHANNEL, &["log".into(), "x".into()]).unwrap();
    event_loop.run_until_idle();
    assert!(raw.borrow().is_empty());
    assert_eq!(*pings.borrow(), vec![vec![Value::from(1)]]);
  }

  #[test]
  fn timer_errors_go_to_console() {
    let (event_loop, clock, host, scope) = scope();
    let console = collect(&host, CONSOLE_CHANNEL);
    scope.set_timeout(Duration::from_millis(5), || {
      Err(jetpack_core::Exception::new("Error", "tick failed").into())
    });
    clock.advance(Duration::from_millis(5));
    event_loop.run_until_idle();
    let console = console.borrow();
    assert_eq!(console.len(), 1);
    let (level, message) = parse_console_message(&console[0]).unwrap();
    assert_eq!(level, ConsoleLevel::Exception);
    assert!(message.contains("tick failed"), "{message}");
  }

  #[test]
  fn closed_scope_is_inert() {
    let (event_loop, _clock, host, scope) = scope();
    let messages = collect(&host, MESSAGE_CHANNEL);
    scope.close();
    scope.self_().post_message("late");
    scope.port().emit("late", &[]);
    scope.console().log(&["late".into()]);
    event_loop.run_until_idle();
    assert!(messages.borrow().is_empty());
  }
}
