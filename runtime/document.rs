// Copyright 2018-2026 the Deno authors. MIT license.

//! A document-like content target that workers attach to.
//!
//! The embedder drives the lifecycle: [`Document::set_ready_state`] fires
//! `DOMContentLoaded` and `load`, [`Document::page_hide`] and
//! [`Document::page_show`] model the back-forward cache, and
//! [`Document::unload`] tears the document down for good.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use jetpack_core::EventEmitter;
use jetpack_core::EventListener;
use jetpack_core::ModuleSpecifier;
use jetpack_core::Object;
use jetpack_core::Value;

pub const DOM_CONTENT_LOADED: &str = "DOMContentLoaded";
pub const LOAD: &str = "load";
pub const PAGE_HIDE: &str = "pagehide";
pub const PAGE_SHOW: &str = "pageshow";
pub const UNLOAD: &str = "unload";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
  Loading,
  /// Structure parsed, subresources may still be loading.
  Interactive,
  Complete,
}

impl ReadyState {
  pub fn as_str(self) -> &'static str {
    match self {
      ReadyState::Loading => "loading",
      ReadyState::Interactive => "interactive",
      ReadyState::Complete => "complete",
    }
  }
}

impl fmt::Display for ReadyState {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

struct DocumentInner {
  url: ModuleSpecifier,
  ready_state: Cell<ReadyState>,
  hidden: Cell<bool>,
  unloaded: Cell<bool>,
  window: Object,
  events: EventEmitter,
}

#[derive(Clone)]
pub struct Document(Rc<DocumentInner>);

impl fmt::Debug for Document {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.debug_struct("Document")
      .field("url", &self.0.url.as_str())
      .field("ready_state", &self.0.ready_state.get())
      .field("unloaded", &self.0.unloaded.get())
      .finish()
  }
}

impl Document {
  pub fn new(url: ModuleSpecifier) -> Self {
    Self::with_ready_state(url, ReadyState::Loading)
  }

  pub fn with_ready_state(url: ModuleSpecifier, state: ReadyState) -> Self {
    let window = Object::new();
    window.set("location", url.as_str());
    Self(Rc::new(DocumentInner {
      url,
      ready_state: Cell::new(state),
      hidden: Cell::new(false),
      unloaded: Cell::new(false),
      window,
      events: EventEmitter::new(),
    }))
  }

  pub fn url(&self) -> &ModuleSpecifier {
    &self.0.url
  }

  pub fn ready_state(&self) -> ReadyState {
    self.0.ready_state.get()
  }

  /// The page's global object, shared with every content script attached
  /// to this document.
  pub fn window(&self) -> &Object {
    &self.0.window
  }

  pub fn is_hidden(&self) -> bool {
    self.0.hidden.get()
  }

  pub fn is_unloaded(&self) -> bool {
    self.0.unloaded.get()
  }

  pub fn on(&self, event: &str, listener: EventListener) {
    self.0.events.on(event, listener);
  }

  pub fn off(&self, event: &str, listener: &EventListener) -> bool {
    self.0.events.off(event, listener)
  }

  /// Moves the document forward. Skipped states still fire their event, so
  /// going straight from `Loading` to `Complete` fires `DOMContentLoaded`
  /// then `load`. Moving backwards is ignored.
  pub fn set_ready_state(&self, state: ReadyState) {
    let current = self.0.ready_state.get();
    if self.is_unloaded() || state <= current {
      return;
    }
    if current < ReadyState::Interactive {
      self.0.ready_state.set(ReadyState::Interactive);
      self.0.events.emit(DOM_CONTENT_LOADED, &[]);
    }
    if state == ReadyState::Complete {
      self.0.ready_state.set(ReadyState::Complete);
      self.0.events.emit(LOAD, &[]);
    }
  }

  pub fn page_hide(&self) {
    if !self.is_unloaded() && !self.0.hidden.replace(true) {
      self.0.events.emit(PAGE_HIDE, &[]);
    }
  }

  pub fn page_show(&self) {
    if !self.is_unloaded() && self.0.hidden.replace(false) {
      self.0.events.emit(PAGE_SHOW, &[]);
    }
  }

  /// Fires `unload` once and drops every document listener.
  pub fn unload(&self) {
    if self.0.unloaded.replace(true) {
      return;
    }
    self.0.events.emit(UNLOAD, &[Value::from(self.0.url.as_str())]);
    self.0.events.remove_all(None);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::RefCell;

  fn record(document: &Document, log: &Rc<RefCell<Vec<&'static str>>>) {
    for event in [DOM_CONTENT_LOADED, LOAD, PAGE_HIDE, PAGE_SHOW, UNLOAD] {
      let log = log.clone();
      document.on(
        event,
        EventListener::new(move |_| {
          log.borrow_mut().push(event);
          Ok(())
        }),
      );
    }
  }

  #[test]
  fn lifecycle_events() {
    let document =
      Document::new(ModuleSpecifier::parse("https://example.com/").unwrap());
    let log = Rc::new(RefCell::new(Vec::new()));
    record(&document, &log);
    document.set_ready_state(ReadyState::Complete);
    document.set_ready_state(ReadyState::Interactive);
    document.page_hide();
    document.page_hide();
    document.page_show();
    document.unload();
    document.unload();
    document.page_hide();
    assert_eq!(
      *log.borrow(),
      vec![DOM_CONTENT_LOADED, LOAD, PAGE_HIDE, PAGE_SHOW, UNLOAD]
    );
    assert_eq!(document.ready_state(), ReadyState::Complete);
  }

  #[test]
  fn window_knows_its_location() {
    let document = Document::with_ready_state(
      ModuleSpecifier::parse("https://example.com/page").unwrap(),
      ReadyState::Interactive,
    );
    assert_eq!(
      document.window().get("location"),
      Value::from("https://example.com/page")
    );
  }
}
