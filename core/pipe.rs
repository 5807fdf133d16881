// Copyright 2018-2026 the Deno authors. MIT license.

//! A pair of entangled pipe ends connecting a privileged side to a
//! restricted one.
//!
//! Every message crosses as JSON text of the form `[event, arg1, arg2, ...]`.
//! Values JSON cannot represent are replaced on the way in, so sending never
//! fails because of its payload. Delivery happens on a later turn of the
//! event loop, in the order the messages were sent.

use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;
use std::rc::Weak;

use crate::error::AnyError;
use crate::error::CoreError;
use crate::error::type_error;
use crate::event::EventEmitter;
use crate::event::EventListener;
use crate::event::ListenerErrorHandler;
use crate::event_loop::EventLoop;
use crate::value::Value;

/// Encodes a message for the wire.
pub fn encode_message(event: &str, args: &[Value]) -> String {
  let mut message = Vec::with_capacity(args.len() + 1);
  message.push(serde_json::Value::String(event.to_string()));
  message.extend(
    args
      .iter()
      .map(|arg| arg.to_json().unwrap_or(serde_json::Value::Null)),
  );
  serde_json::Value::Array(message).to_string()
}

pub fn decode_message(text: &str) -> Result<(String, Vec<Value>), AnyError> {
  let message: Vec<serde_json::Value> = serde_json::from_str(text)?;
  let mut items = message.iter();
  let event = match items.next() {
    Some(serde_json::Value::String(event)) => event.clone(),
    _ => return Err(type_error("pipe message must start with an event name")),
  };
  Ok((event, items.map(Value::from_json).collect()))
}

struct PipeEndInner {
  label: String,
  event_loop: EventLoop,
  emitter: EventEmitter,
  peer: RefCell<Weak<PipeEndInner>>,
  closed: Cell<bool>,
}

impl PipeEndInner {
  fn receive(&self, text: &str) {
    if self.closed.get() {
      log::debug!("{}: dropping message for closed pipe end", self.label);
      return;
    }
    match decode_message(text) {
      Ok((event, args)) => {
        self.emitter.emit(&event, &args);
      }
      Err(err) => log::warn!("{}: malformed pipe message: {err}", self.label),
    }
  }
}

/// One side of a pipe. Cloning yields another handle to the same side.
#[derive(Clone)]
pub struct PipeEnd(Rc<PipeEndInner>);

pub fn create_pipe(event_loop: &EventLoop, label: &str) -> (PipeEnd, PipeEnd) {
  let make = |side: &str| {
    Rc::new(PipeEndInner {
      label: format!("{label} ({side})"),
      event_loop: event_loop.clone(),
      emitter: EventEmitter::new(),
      peer: RefCell::new(Weak::new()),
      closed: Cell::new(false),
    })
  };
  let host = make("host");
  let content = make("content");
  *host.peer.borrow_mut() = Rc::downgrade(&content);
  *content.peer.borrow_mut() = Rc::downgrade(&host);
  (PipeEnd(host), PipeEnd(content))
}

impl PipeEnd {
  pub fn label(&self) -> &str {
    &self.0.label
  }

  /// Queues `[event, ...args]` for the other side.
  pub fn send(&self, event: &str, args: &[Value]) -> Result<(), CoreError> {
    if self.0.closed.get() {
      return Err(CoreError::destroyed(&self.0.label));
    }
    let text = encode_message(event, args);
    let peer = self.0.peer.borrow().clone();
    self.0.event_loop.queue_task(move || {
      if let Some(peer) = peer.upgrade() {
        peer.receive(&text);
      }
    });
    Ok(())
  }

  /// Delivers `[event, ...args]` to the other side before returning. Used
  /// for lifecycle notifications that must land ahead of a teardown.
  pub fn send_sync(
    &self,
    event: &str,
    args: &[Value],
  ) -> Result<(), CoreError> {
    if self.0.closed.get() {
      return Err(CoreError::destroyed(&self.0.label));
    }
    let text = encode_message(event, args);
    let peer = self.0.peer.borrow().upgrade();
    if let Some(peer) = peer {
      peer.receive(&text);
    }
    Ok(())
  }

  pub fn on(&self, event: &str, listener: EventListener) {
    if !self.0.closed.get() {
      self.0.emitter.on(event, listener);
    }
  }

  pub fn once(&self, event: &str, listener: EventListener) {
    if !self.0.closed.get() {
      self.0.emitter.once(event, listener);
    }
  }

  pub fn off(&self, event: &str, listener: &EventListener) -> bool {
    self.0.emitter.off(event, listener)
  }

  pub fn has_listener_for(&self, event: &str) -> bool {
    self.0.emitter.has_listener_for(event)
  }

  pub fn set_error_handler(&self, handler: ListenerErrorHandler) {
    self.0.emitter.set_error_handler(handler);
  }

  /// Drops every listener and refuses further traffic on this side. Messages
  /// already in flight towards it are discarded on arrival.
  pub fn close(&self) {
    if self.0.closed.replace(true) {
      return;
    }
    self.0.emitter.remove_all(None);
    log::debug!("{}: closed", self.0.label);
  }

  pub fn is_closed(&self) -> bool {
    self.0.closed.get()
  }
}
