// Copyright 2018-2026 the Deno authors. MIT license.

//! Content workers attach scripts to a [`Document`] and bridge them to the
//! add-on through a message pipe.
//!
//! A worker moves through `Created -> Injected -> Active -> Destroyed`. The
//! scripts run once, in a restricted context, when the document reaches the
//! state picked by [`ContentScriptWhen`]. After that the host talks to them
//! with [`ContentWorker::post_message`] and [`ContentWorker::port`], and they
//! answer through [`ContentScope`].

use std::cell::Cell;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::rc::Weak;
use std::str::FromStr;

use jetpack_core::AnyError;
use jetpack_core::Capabilities;
use jetpack_core::Console;
use jetpack_core::ContentScriptError;
use jetpack_core::ContextFactory;
use jetpack_core::ContextOptions;
use jetpack_core::CoreError;
use jetpack_core::Disposable;
use jetpack_core::Ensured;
use jetpack_core::EventEmitter;
use jetpack_core::EventListener;
use jetpack_core::EventLoop;
use jetpack_core::Exception;
use jetpack_core::Loader;
use jetpack_core::LoaderPhase;
use jetpack_core::ModuleSpecifier;
use jetpack_core::Object;
use jetpack_core::PipeEnd;
use jetpack_core::Reason;
use jetpack_core::StackFrame;
use jetpack_core::Timers;
use jetpack_core::Value;
use jetpack_core::create_pipe;
use jetpack_core::error::serialize_stack;
use serde::Deserialize;

use crate::content_scope::CONSOLE_CHANNEL;
use crate::content_scope::ContentScope;
use crate::content_scope::ContentScript;
use crate::content_scope::EVENT_CHANNEL;
use crate::content_scope::MESSAGE_CHANNEL;
use crate::content_scope::parse_console_message;
use crate::content_scope::pipe_console;
use crate::content_scope::split_port_message;
use crate::document;
use crate::document::Document;
use crate::document::ReadyState;

/// File name reported for errors raised by inline content scripts.
pub const INLINE_SCRIPT_FILENAME: &str = "javascript:contentScript";

const DETACH: &str = "detach";
const ERROR: &str = "error";
const MESSAGE: &str = "message";

/// When the content scripts of a worker are injected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentScriptWhen {
  /// As soon as the worker is attached.
  Start,
  /// Once the document structure is ready (`DOMContentLoaded`).
  Ready,
  /// Once the document and its subresources finished loading.
  #[default]
  End,
}

impl ContentScriptWhen {
  fn is_due(self, state: ReadyState) -> bool {
    match self {
      ContentScriptWhen::Start => true,
      ContentScriptWhen::Ready => state >= ReadyState::Interactive,
      ContentScriptWhen::End => state == ReadyState::Complete,
    }
  }
}

impl FromStr for ContentScriptWhen {
  type Err = CoreError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "start" => Ok(ContentScriptWhen::Start),
      "ready" => Ok(ContentScriptWhen::Ready),
      "end" => Ok(ContentScriptWhen::End),
      _ => Err(CoreError::InvalidOption(format!(
        "contentScriptWhen must be one of `start`, `ready` or `end`, got `{s}`"
      ))),
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
  Created,
  /// Scripts are being evaluated.
  Injected,
  Active,
  Destroyed,
}

/// Provides the scripts named in `contentScriptFile`.
pub trait ContentScriptLoader {
  fn load(&self, url: &ModuleSpecifier) -> Result<ContentScript, AnyError>;
}

/// Content scripts registered up front by URL.
#[derive(Default)]
pub struct StaticContentScriptLoader {
  scripts: HashMap<ModuleSpecifier, ContentScript>,
}

impl StaticContentScriptLoader {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, url: ModuleSpecifier, script: ContentScript) {
    self.scripts.insert(url, script);
  }

  pub fn with(mut self, url: ModuleSpecifier, script: ContentScript) -> Self {
    self.insert(url, script);
    self
  }
}

impl ContentScriptLoader for StaticContentScriptLoader {
  fn load(&self, url: &ModuleSpecifier) -> Result<ContentScript, AnyError> {
    self.scripts.get(url).cloned().ok_or_else(|| {
      Exception::new("Error", format!("Content script `{url}` not found"))
        .into()
    })
  }
}

#[derive(Clone, Default)]
pub struct WorkerOptions {
  /// `resource:` or `file:` URLs, evaluated in order before `content_script`.
  pub content_script_file: Vec<String>,
  pub content_script: Vec<ContentScript>,
  pub content_script_when: ContentScriptWhen,
  /// Exposed read-only to the scripts as `self.options`.
  pub content_script_options: Option<serde_json::Value>,
  pub on_error: Option<EventListener>,
  pub on_message: Option<EventListener>,
  pub on_detach: Option<EventListener>,
}

impl fmt::Debug for WorkerOptions {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.debug_struct("WorkerOptions")
      .field("content_script_file", &self.content_script_file)
      .field("content_script", &self.content_script.len())
      .field("content_script_when", &self.content_script_when)
      .field("content_script_options", &self.content_script_options)
      .finish()
  }
}

fn parse_script_files(
  files: &[String],
) -> Result<Vec<ModuleSpecifier>, CoreError> {
  files
    .iter()
    .map(|file| match ModuleSpecifier::parse(file) {
      Ok(url) if matches!(url.scheme(), "resource" | "file") => Ok(url),
      _ => Err(CoreError::InvalidOption(format!(
        "Unsupported `contentScriptFile` url: {file}"
      ))),
    })
    .collect()
}

/// What exists only between injection and destruction.
struct Attachment {
  pipe: PipeEnd,
  scope: ContentScope,
  timers: Timers,
}

struct WorkerInner {
  label: String,
  document: Document,
  contexts: ContextFactory,
  event_loop: EventLoop,
  console: Console,
  scripts: Rc<dyn ContentScriptLoader>,
  script_files: Vec<ModuleSpecifier>,
  inline_scripts: Vec<ContentScript>,
  when: ContentScriptWhen,
  options: Value,
  state: Cell<WorkerState>,
  frozen: Cell<bool>,
  events: EventEmitter,
  port: EventEmitter,
  early_port_events: RefCell<Vec<(String, Vec<Value>)>>,
  attachment: RefCell<Option<Attachment>>,
  document_listeners: RefCell<Vec<(&'static str, EventListener)>>,
  ensured: RefCell<Option<Ensured>>,
}

impl Disposable for WorkerInner {
  fn unload(&self, _reason: Reason) -> Result<(), AnyError> {
    self.destroy();
    Ok(())
  }
}

impl WorkerInner {
  fn pipe(&self) -> Option<PipeEnd> {
    self.attachment.borrow().as_ref().map(|a| a.pipe.clone())
  }

  /// The pipe into an attached content context that is still alive.
  fn live_pipe(&self) -> Result<PipeEnd, CoreError> {
    let attachment = self.attachment.borrow();
    let Some(attachment) = attachment.as_ref() else {
      return Err(CoreError::NotReady);
    };
    if attachment.scope.context().is_destroyed() {
      return Err(CoreError::destroyed(&self.label));
    }
    Ok(attachment.pipe.clone())
  }

  fn report_error(&self, filename: &str, err: &AnyError) {
    let exception = Exception::from_error(err);
    if self.events.has_listener_for(ERROR) {
      let error = Object::from_entries([
        ("name", Value::from(exception.name.to_string())),
        ("message", Value::from(exception.message.clone())),
        ("fileName", Value::from(filename)),
        (
          "lineNumber",
          exception.line_number.map(Value::from).unwrap_or_default(),
        ),
        (
          "stack",
          Value::from(serialize_stack(&[StackFrame::from_location(
            Some(filename.to_string()),
            exception.line_number,
            exception.column_number,
          )])),
        ),
      ]);
      error.freeze();
      self.events.emit(ERROR, &[error.into()]);
    } else {
      let error = CoreError::from(ContentScriptError {
        filename: filename.to_string(),
        exception,
      });
      self.console.exception(&AnyError::from(error));
    }
  }

  fn freeze(&self) {
    if self.state.get() != WorkerState::Active || self.frozen.replace(true) {
      return;
    }
    log::debug!("{}: frozen", self.label);
    // Content may still arm timers from its own pagehide listener.
    if let Some(pipe) = self.pipe() {
      let _ = pipe.send_sync(document::PAGE_HIDE, &[]);
    }
    let timers = self.attachment.borrow().as_ref().map(|a| a.timers.clone());
    if let Some(timers) = timers {
      timers.suspend_all();
    }
    self.events.emit(document::PAGE_HIDE, &[]);
  }

  fn thaw(&self) {
    if self.state.get() != WorkerState::Active || !self.frozen.replace(false) {
      return;
    }
    log::debug!("{}: thawed", self.label);
    if let Some(attachment) = &*self.attachment.borrow() {
      attachment.timers.resume_all();
    }
    if let Some(pipe) = self.pipe() {
      let _ = pipe.send_sync(document::PAGE_SHOW, &[]);
    }
    self.events.emit(document::PAGE_SHOW, &[]);
  }

  fn destroy(&self) -> bool {
    if self.state.replace(WorkerState::Destroyed) == WorkerState::Destroyed {
      return false;
    }
    log::debug!("{}: destroyed", self.label);

    let attachment = self.attachment.borrow_mut().take();
    if let Some(Attachment { pipe, scope, timers }) = attachment {
      // The content side hears about it before anything is torn down.
      let _ = pipe.send_sync(DETACH, &[]);
      timers.clear_all();
      scope.close();
      scope.context().destroy();
      pipe.close();
    }

    let listeners = std::mem::take(&mut *self.document_listeners.borrow_mut());
    for (event, listener) in listeners {
      self.document.off(event, &listener);
    }
    self.early_port_events.borrow_mut().clear();

    self.events.emit(DETACH, &[]);
    self.events.remove_all(None);
    self.port.remove_all(None);

    let ensured = self.ensured.borrow_mut().take();
    if let Some(ensured) = ensured
      && let Err(err) = ensured.unload(Reason::Unknown)
    {
      log::error!("{}: {err:#}", self.label);
    }
    true
  }
}

/// A set of content scripts attached to one document.
#[derive(Clone)]
pub struct ContentWorker(Rc<WorkerInner>);

impl fmt::Debug for ContentWorker {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.debug_struct("ContentWorker")
      .field("label", &self.0.label)
      .field("state", &self.0.state.get())
      .field("frozen", &self.0.frozen.get())
      .finish()
  }
}

impl ContentWorker {
  /// Attaches a worker to `document`. The worker is torn down with the
  /// document, on [`ContentWorker::destroy`], or when `loader` unloads.
  pub fn new(
    loader: &Loader,
    document: Document,
    options: WorkerOptions,
    scripts: Rc<dyn ContentScriptLoader>,
  ) -> Result<Self, CoreError> {
    if loader.phase() != LoaderPhase::Active {
      return Err(CoreError::destroyed("Loader"));
    }
    if document.is_unloaded() {
      return Err(CoreError::destroyed(format!(
        "Document `{}`",
        document.url()
      )));
    }
    let script_files = parse_script_files(&options.content_script_file)?;

    let events = EventEmitter::new();
    let listeners = [
      (ERROR, options.on_error),
      (MESSAGE, options.on_message),
      (DETACH, options.on_detach),
    ];
    for (event, listener) in listeners {
      if let Some(listener) = listener {
        events.on(event, listener);
      }
    }

    let inner = Rc::new(WorkerInner {
      label: format!("content worker ({})", document.url()),
      contexts: loader.contexts().clone(),
      event_loop: loader.event_loop().clone(),
      console: loader.console(),
      scripts,
      script_files,
      inline_scripts: options.content_script,
      when: options.content_script_when,
      options: options
        .content_script_options
        .as_ref()
        .map(Object::snapshot)
        .unwrap_or_default(),
      state: Cell::new(WorkerState::Created),
      frozen: Cell::new(false),
      events,
      port: EventEmitter::new(),
      early_port_events: RefCell::new(Vec::new()),
      attachment: RefCell::new(None),
      document_listeners: RefCell::new(Vec::new()),
      ensured: RefCell::new(None),
      document,
    });
    let ensured = loader.unloader().ensure(&inner);
    *inner.ensured.borrow_mut() = Some(ensured);

    let worker = Self(inner);
    worker.watch_document();
    worker.inject_if_due();
    Ok(worker)
  }

  fn watch_document(&self) {
    let watch = |event: &'static str, on_event: fn(&ContentWorker)| {
      let weak = Rc::downgrade(&self.0);
      let listener = EventListener::new(move |_| {
        if let Some(inner) = weak.upgrade() {
          on_event(&ContentWorker(inner));
        }
        Ok(())
      });
      self.0.document.on(event, listener.clone());
      self.0.document_listeners.borrow_mut().push((event, listener));
    };
    watch(document::DOM_CONTENT_LOADED, ContentWorker::inject_if_due);
    watch(document::LOAD, ContentWorker::inject_if_due);
    watch(document::PAGE_HIDE, |worker| worker.0.freeze());
    watch(document::PAGE_SHOW, |worker| worker.0.thaw());
    watch(document::UNLOAD, |worker| {
      worker.destroy();
    });
  }

  fn inject_if_due(&self) {
    if self.0.state.get() == WorkerState::Created
      && self.0.when.is_due(self.0.document.ready_state())
    {
      self.inject();
    }
  }

  fn inject(&self) {
    let inner = &self.0;
    inner.state.set(WorkerState::Injected);
    log::debug!("{}: injecting content scripts", inner.label);

    let (host, content) = create_pipe(&inner.event_loop, &inner.label);
    let timers = Timers::new(inner.event_loop.clone());
    let console = pipe_console(&inner.label, &content);
    let window = inner.document.window().clone();
    let capabilities = Capabilities {
      console: Some(console.clone()),
      timers: Some(timers.clone()),
      pipe: Some(content.clone()),
      globals: [("window".to_string(), Value::from(window.clone()))]
        .into_iter()
        .collect(),
      ..Default::default()
    };
    let context = match inner.contexts.create(
      ContextOptions {
        label: inner.label.clone(),
        restricted: true,
      },
      capabilities,
    ) {
      Ok(context) => context,
      Err(err) => {
        log::error!("{}: {err}", inner.label);
        self.destroy();
        return;
      }
    };
    let scope = ContentScope::new(
      context,
      content,
      console,
      timers.clone(),
      window,
      inner.options.clone(),
    );
    self.connect(&host, &scope);
    *inner.attachment.borrow_mut() = Some(Attachment {
      pipe: host.clone(),
      scope: scope.clone(),
      timers,
    });

    let files = inner.script_files.iter().map(|url| {
      let script = inner.scripts.load(url);
      (url.to_string(), script)
    });
    let inline = inner
      .inline_scripts
      .iter()
      .map(|script| (INLINE_SCRIPT_FILENAME.to_string(), Ok(script.clone())));
    for (filename, script) in files.chain(inline) {
      let result = script.and_then(|script| {
        scope.context().evaluate(|| script(&scope))?
      });
      if let Err(err) = result {
        inner.report_error(&filename, &err);
        break;
      }
      if self.is_destroyed() {
        return;
      }
    }
    if self.is_destroyed() {
      return;
    }

    inner.state.set(WorkerState::Active);
    log::debug!("{}: active", inner.label);
    if inner.document.is_hidden() {
      inner.freeze();
    }
    let early = std::mem::take(&mut *inner.early_port_events.borrow_mut());
    for (event, args) in early {
      send_port_event(&host, &event, &args);
    }
  }

  /// Routes content-side traffic to the host-side emitters.
  fn connect(&self, host: &PipeEnd, scope: &ContentScope) {
    let weak = Rc::downgrade(&self.0);
    let upgrade = move || Weak::upgrade(&weak);

    host.on(MESSAGE_CHANNEL, {
      let upgrade = upgrade.clone();
      EventListener::new(move |args| {
        if let Some(inner) = upgrade() {
          inner.events.emit(MESSAGE, args);
        }
        Ok(())
      })
    });
    host.on(EVENT_CHANNEL, {
      let upgrade = upgrade.clone();
      EventListener::new(move |args| {
        if let Some(inner) = upgrade()
          && let Some((event, rest)) = split_port_message(args)
        {
          inner.port.emit(event, rest);
        }
        Ok(())
      })
    });
    host.on(CONSOLE_CHANNEL, {
      let upgrade = upgrade.clone();
      EventListener::new(move |args| {
        if let Some(inner) = upgrade()
          && let Some((level, message)) = parse_console_message(args)
        {
          inner.console.write(level, &message);
        }
        Ok(())
      })
    });
    scope.set_error_handler(Rc::new(move |event: &str, err: AnyError| {
      log::trace!("content listener for `{event}` failed");
      if let Some(inner) = upgrade() {
        inner.report_error(INLINE_SCRIPT_FILENAME, &err);
      }
    }));
  }

  pub fn state(&self) -> WorkerState {
    self.0.state.get()
  }

  pub fn is_destroyed(&self) -> bool {
    self.0.state.get() == WorkerState::Destroyed
  }

  pub fn is_frozen(&self) -> bool {
    self.0.frozen.get()
  }

  /// The document URL, until the worker is destroyed.
  pub fn url(&self) -> Option<ModuleSpecifier> {
    (!self.is_destroyed()).then(|| self.0.document.url().clone())
  }

  /// Host-side events: `message`, `error`, `detach`, `pagehide` and
  /// `pageshow`.
  pub fn on(&self, event: &str, listener: EventListener) {
    if !self.is_destroyed() {
      self.0.events.on(event, listener);
    }
  }

  pub fn once(&self, event: &str, listener: EventListener) {
    if !self.is_destroyed() {
      self.0.events.once(event, listener);
    }
  }

  pub fn off(&self, event: &str, listener: &EventListener) -> bool {
    self.0.events.off(event, listener)
  }

  /// Delivers `data` to the scripts' `self.on("message")` listeners.
  pub fn post_message(&self, data: impl Into<Value>) -> Result<(), CoreError> {
    match self.state() {
      WorkerState::Destroyed => Err(CoreError::destroyed(&self.0.label)),
      _ if self.is_frozen() => Err(CoreError::Frozen),
      WorkerState::Active => {
        self.0.live_pipe()?.send(MESSAGE_CHANNEL, &[data.into()])
      }
      WorkerState::Created | WorkerState::Injected => Err(CoreError::NotReady),
    }
  }

  pub fn port(&self) -> WorkerPort {
    WorkerPort(self.clone())
  }

  /// Detaches the worker. Returns `false` if it was already destroyed.
  pub fn destroy(&self) -> bool {
    self.0.destroy()
  }
}

fn send_port_event(pipe: &PipeEnd, event: &str, args: &[Value]) {
  let mut message = Vec::with_capacity(args.len() + 1);
  message.push(Value::from(event));
  message.extend_from_slice(args);
  if let Err(err) = pipe.send(EVENT_CHANNEL, &message) {
    log::debug!("dropping port event `{event}`: {err}");
  }
}

/// The host side of `self.port`.
#[derive(Clone)]
pub struct WorkerPort(ContentWorker);

impl WorkerPort {
  pub fn on(&self, event: &str, listener: EventListener) {
    if !self.0.is_destroyed() {
      self.0.0.port.on(event, listener);
    }
  }

  pub fn once(&self, event: &str, listener: EventListener) {
    if !self.0.is_destroyed() {
      self.0.0.port.once(event, listener);
    }
  }

  pub fn off(&self, event: &str, listener: &EventListener) -> bool {
    self.0.0.port.off(event, listener)
  }

  /// Emits `event` to the scripts' `self.port` listeners. Events emitted
  /// before the scripts ran are held back until they did.
  pub fn emit(&self, event: &str, args: &[Value]) -> Result<(), CoreError> {
    let worker = &self.0;
    match worker.state() {
      WorkerState::Destroyed => Err(CoreError::destroyed(&worker.0.label)),
      _ if worker.is_frozen() => Err(CoreError::Frozen),
      WorkerState::Created | WorkerState::Injected => {
        worker
          .0
          .early_port_events
          .borrow_mut()
          .push((event.to_string(), args.to_vec()));
        Ok(())
      }
      WorkerState::Active => {
        send_port_event(&worker.0.live_pipe()?, event, args);
        Ok(())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::content_scope::content_script;
  use jetpack_core::ConsoleLevel;
  use jetpack_core::LoaderOptions;
  use jetpack_core::ManualClock;
  use jetpack_core::NoopModuleLoader;
  use pretty_assertions::assert_eq;
  use std::time::Duration;

  struct Harness {
    clock: Rc<ManualClock>,
    event_loop: EventLoop,
    loader: Loader,
    document: Document,
  }

  impl Harness {
    fn new(state: ReadyState) -> Self {
      let clock = Rc::new(ManualClock::default());
      let event_loop = EventLoop::with_clock(clock.clone());
      let loader = Loader::new(
        LoaderOptions::default(),
        Rc::new(NoopModuleLoader),
        event_loop.clone(),
      )
      .unwrap();
      let url = ModuleSpecifier::parse("https://example.com/").unwrap();
      Self {
        clock,
        event_loop,
        loader,
        document: Document::with_ready_state(url, state),
      }
    }

    fn worker(&self, options: WorkerOptions) -> ContentWorker {
      ContentWorker::new(
        &self.loader,
        self.document.clone(),
        options,
        Rc::new(StaticContentScriptLoader::new()),
      )
      .unwrap()
    }

    fn advance(&self, ms: u64) {
      self.clock.advance(Duration::from_millis(ms));
      self.event_loop.run_until_idle();
    }
  }

  fn inline(
    script: impl Fn(&ContentScope) -> Result<(), AnyError> + 'static,
  ) -> WorkerOptions {
    WorkerOptions {
      content_script: vec![content_script(script)],
      ..Default::default()
    }
  }

  fn recorder() -> (EventListener, Rc<RefCell<Vec<Vec<Value>>>>) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let listener = EventListener::new({
      let log = log.clone();
      move |args| {
        log.borrow_mut().push(args.to_vec());
        Ok(())
      }
    });
    (listener, log)
  }

  fn ran_flag() -> (Rc<Cell<u32>>, WorkerOptions) {
    let runs = Rc::new(Cell::new(0));
    let options = inline({
      let runs = runs.clone();
      move |_| {
        runs.set(runs.get() + 1);
        Ok(())
      }
    });
    (runs, options)
  }

  #[test]
  fn end_waits_for_full_load() {
    let harness = Harness::new(ReadyState::Interactive);
    let (runs, options) = ran_flag();
    let worker = harness.worker(options);
    assert_eq!(worker.state(), WorkerState::Created);
    assert_eq!(runs.get(), 0);

    harness.document.set_ready_state(ReadyState::Complete);
    assert_eq!(worker.state(), WorkerState::Active);
    assert_eq!(runs.get(), 1);
  }

  #[test]
  fn start_and_ready_policies() {
    let harness = Harness::new(ReadyState::Loading);
    let (start_runs, mut start) = ran_flag();
    start.content_script_when = ContentScriptWhen::Start;
    let (ready_runs, mut ready) = ran_flag();
    ready.content_script_when = ContentScriptWhen::Ready;
    let start = harness.worker(start);
    let ready = harness.worker(ready);
    assert_eq!(start_runs.get(), 1);
    assert_eq!(ready_runs.get(), 0);

    harness.document.set_ready_state(ReadyState::Interactive);
    assert_eq!(ready_runs.get(), 1);
    harness.document.set_ready_state(ReadyState::Complete);
    assert_eq!((start_runs.get(), ready_runs.get()), (1, 1));
    assert_eq!(start.state(), WorkerState::Active);
    assert_eq!(ready.state(), WorkerState::Active);
    assert_eq!("ready".parse::<ContentScriptWhen>().unwrap(), ready.0.when);
    assert!("later".parse::<ContentScriptWhen>().is_err());
  }

  #[test]
  fn post_message_round_trip() {
    let harness = Harness::new(ReadyState::Complete);
    let (on_message, messages) = recorder();
    let worker = harness.worker(WorkerOptions {
      on_message: Some(on_message),
      ..inline(|scope| {
        let this = scope.self_().clone();
        scope.self_().on(
          MESSAGE_CHANNEL,
          EventListener::new(move |args| {
            let text = args[0].as_str().unwrap_or_default().to_uppercase();
            this.post_message(text);
            Ok(())
          }),
        );
        Ok(())
      })
    });

    worker.post_message("hello").unwrap();
    assert!(messages.borrow().is_empty());
    harness.event_loop.run_until_idle();
    assert_eq!(*messages.borrow(), vec![vec![Value::from("HELLO")]]);
  }

  #[test]
  fn port_events_before_injection_are_flushed() {
    let harness = Harness::new(ReadyState::Loading);
    let worker = harness.worker(inline(|scope| {
      let port = scope.port().clone();
      scope.port().on(
        "ping",
        EventListener::new(move |args| {
          port.emit("pong", args);
          Ok(())
        }),
      );
      Ok(())
    }));
    let (on_pong, pongs) = recorder();
    worker.port().on("pong", on_pong);
    worker.port().emit("ping", &[1.into()]).unwrap();
    assert_eq!(
      worker.post_message("too early"),
      Err(CoreError::NotReady)
    );

    harness.event_loop.run_until_idle();
    assert!(pongs.borrow().is_empty());
    harness.document.set_ready_state(ReadyState::Complete);
    harness.event_loop.run_until_idle();
    assert_eq!(*pongs.borrow(), vec![vec![Value::from(1)]]);
  }

  #[test]
  fn script_errors_become_error_events() {
    let harness = Harness::new(ReadyState::Complete);
    let (on_error, errors) = recorder();
    let worker = harness.worker(WorkerOptions {
      on_error: Some(on_error),
      ..inline(|_| {
        Err(Exception::new("TypeError", "boom").at_line(3).into())
      })
    });
    assert_eq!(worker.state(), WorkerState::Active);
    let errors = errors.borrow();
    assert_eq!(errors.len(), 1);
    let error = errors[0][0].as_object().unwrap();
    assert!(error.is_frozen());
    assert_eq!(error.get("name"), Value::from("TypeError"));
    assert_eq!(error.get("message"), Value::from("boom"));
    assert_eq!(error.get("fileName"), Value::from(INLINE_SCRIPT_FILENAME));
    assert_eq!(error.get("lineNumber"), Value::from(3));
    assert_eq!(
      error.get("stack"),
      Value::from("@javascript:contentScript:3:0\n")
    );
  }

  #[test]
  fn unhandled_errors_reach_the_host_console() {
    let harness = Harness::new(ReadyState::Complete);
    let lines = Rc::new(RefCell::new(Vec::new()));
    harness.loader.set_console(Console::with_sink(
      "addon",
      Rc::new({
        let lines = lines.clone();
        move |level: ConsoleLevel, message: &str| {
          lines.borrow_mut().push((level, message.to_string()));
        }
      }),
    ));
    let worker = harness.worker(inline(|scope| {
      scope.console().log(&["from content".into()]);
      scope.self_().on(
        MESSAGE_CHANNEL,
        EventListener::new(|_| Err(Exception::new("Error", "bad").into())),
      );
      Err(Exception::new("Error", "oops").into())
    }));
    harness.event_loop.run_until_idle();
    worker.post_message("ping").unwrap();
    harness.event_loop.run_until_idle();
    assert_eq!(
      *lines.borrow(),
      vec![
        (
          ConsoleLevel::Exception,
          format!("Error: oops ({INLINE_SCRIPT_FILENAME})")
        ),
        (ConsoleLevel::Log, "from content".to_string()),
        (
          ConsoleLevel::Exception,
          format!("Error: bad ({INLINE_SCRIPT_FILENAME})")
        ),
      ]
    );
  }

  #[test]
  fn files_run_before_inline_scripts() {
    let harness = Harness::new(ReadyState::Complete);
    let order = Rc::new(RefCell::new(Vec::new()));
    let file = ModuleSpecifier::parse("resource://addon/data/a.js").unwrap();
    let scripts = StaticContentScriptLoader::new().with(
      file.clone(),
      content_script({
        let order = order.clone();
        move |scope| {
          order.borrow_mut().push("file");
          scope.set_global("fromFile", true)?;
          Ok(())
        }
      }),
    );
    let options = WorkerOptions {
      content_script_file: vec![file.to_string()],
      ..inline({
        let order = order.clone();
        move |scope| {
          assert_eq!(scope.global("fromFile")?, Value::from(true));
          order.borrow_mut().push("inline");
          Ok(())
        }
      })
    };
    ContentWorker::new(
      &harness.loader,
      harness.document.clone(),
      options,
      Rc::new(scripts),
    )
    .unwrap();
    assert_eq!(*order.borrow(), vec!["file", "inline"]);

    let remote = ContentWorker::new(
      &harness.loader,
      harness.document.clone(),
      WorkerOptions {
        content_script_file: vec!["https://example.com/a.js".to_string()],
        ..Default::default()
      },
      Rc::new(StaticContentScriptLoader::new()),
    );
    assert!(matches!(remote, Err(CoreError::InvalidOption(_))));
  }

  #[test]
  fn options_are_a_frozen_snapshot() {
    let harness = Harness::new(ReadyState::Complete);
    let seen = Rc::new(RefCell::new(None));
    harness.worker(WorkerOptions {
      content_script_options: Some(serde_json::json!({ "a": [1, 2] })),
      ..inline({
        let seen = seen.clone();
        move |scope| {
          *seen.borrow_mut() = Some(scope.self_().options().clone());
          Ok(())
        }
      })
    });
    let options = seen.borrow().clone().unwrap();
    let options = options.as_object().unwrap();
    assert!(options.is_frozen());
    assert!(!options.set("b", 1));
    assert_eq!(options.get("a").to_json(), Some(serde_json::json!([1, 2])));
  }

  #[test]
  fn page_hide_freezes_timers_and_messages() {
    let harness = Harness::new(ReadyState::Complete);
    let (on_message, messages) = recorder();
    let content_events = Rc::new(RefCell::new(Vec::new()));
    let worker = harness.worker(WorkerOptions {
      on_message: Some(on_message),
      ..inline({
        let content_events = content_events.clone();
        move |scope| {
          for event in [document::PAGE_HIDE, document::PAGE_SHOW] {
            let content_events = content_events.clone();
            scope.self_().on(
              event,
              EventListener::new(move |_| {
                content_events.borrow_mut().push(event);
                Ok(())
              }),
            );
          }
          let this = scope.self_().clone();
          scope.set_timeout(Duration::from_millis(10), move || {
            this.post_message("tick");
            Ok(())
          });
          Ok(())
        }
      })
    });

    harness.advance(4);
    harness.document.page_hide();
    assert!(worker.is_frozen());
    assert_eq!(worker.post_message("x"), Err(CoreError::Frozen));
    harness.advance(50);
    assert!(messages.borrow().is_empty());

    harness.document.page_show();
    assert!(!worker.is_frozen());
    harness.advance(5);
    assert!(messages.borrow().is_empty());
    harness.advance(1);
    assert_eq!(*messages.borrow(), vec![vec![Value::from("tick")]]);
    assert_eq!(
      *content_events.borrow(),
      vec![document::PAGE_HIDE, document::PAGE_SHOW]
    );
  }

  #[test]
  fn timers_armed_on_page_hide_stay_frozen() {
    let harness = Harness::new(ReadyState::Complete);
    let fired = Rc::new(Cell::new(0));
    let worker = harness.worker(inline({
      let fired = fired.clone();
      move |scope| {
        let fired = fired.clone();
        let armed_from = scope.clone();
        scope.self_().on(
          document::PAGE_HIDE,
          EventListener::new(move |_| {
            let fired = fired.clone();
            armed_from.set_timeout(Duration::from_millis(5), move || {
              fired.set(fired.get() + 1);
              Ok(())
            });
            Ok(())
          }),
        );
        Ok(())
      }
    }));

    harness.document.page_hide();
    assert!(worker.is_frozen());
    harness.advance(50);
    assert_eq!(fired.get(), 0);

    harness.document.page_show();
    harness.advance(5);
    assert_eq!(fired.get(), 1);
  }

  #[test]
  fn loader_destroy_detaches_workers() {
    let harness = Harness::new(ReadyState::Complete);
    let (on_detach, detaches) = recorder();
    let received = Rc::new(Cell::new(0));
    let worker = harness.worker(WorkerOptions {
      on_detach: Some(on_detach),
      ..inline({
        let received = received.clone();
        move |scope| {
          let received = received.clone();
          scope.self_().on(
            MESSAGE_CHANNEL,
            EventListener::new(move |_| {
              received.set(received.get() + 1);
              Ok(())
            }),
          );
          Ok(())
        }
      })
    });

    assert!(harness.loader.destroy());
    assert!(worker.is_destroyed());
    assert_eq!(detaches.borrow().len(), 1);
    assert!(
      worker
        .post_message("after destroy")
        .unwrap_err()
        .is_destroyed()
    );
    harness.advance(10);
    assert_eq!(received.get(), 0);
  }

  #[test]
  fn sends_into_a_destroyed_context_fail() {
    let harness = Harness::new(ReadyState::Complete);
    let received = Rc::new(Cell::new(0));
    let worker = harness.worker(inline({
      let received = received.clone();
      move |scope| {
        let received = received.clone();
        scope.port().on(
          "ping",
          EventListener::new(move |_| {
            received.set(received.get() + 1);
            Ok(())
          }),
        );
        Ok(())
      }
    }));

    harness.loader.contexts().destroy_all();
    assert_eq!(worker.state(), WorkerState::Active);
    assert!(worker.post_message("x").unwrap_err().is_destroyed());
    assert!(worker.port().emit("ping", &[]).unwrap_err().is_destroyed());
    harness.advance(10);
    assert_eq!(received.get(), 0);
  }

  #[test]
  fn destroy_detaches_once_and_silences_content() {
    let harness = Harness::new(ReadyState::Complete);
    let (on_detach, detaches) = recorder();
    let (on_message, messages) = recorder();
    let content_detaches = Rc::new(Cell::new(0));
    let worker = harness.worker(WorkerOptions {
      on_detach: Some(on_detach),
      on_message: Some(on_message),
      ..inline({
        let content_detaches = content_detaches.clone();
        move |scope| {
          let content_detaches = content_detaches.clone();
          scope.self_().on(
            DETACH,
            EventListener::new(move |_| {
              content_detaches.set(content_detaches.get() + 1);
              Ok(())
            }),
          );
          let this = scope.self_().clone();
          let port = scope.port().clone();
          scope.set_interval(Duration::from_millis(10), move || {
            this.post_message("tick");
            port.emit("tick", &[]);
            Ok(())
          });
          Ok(())
        }
      })
    });

    harness.advance(10);
    assert_eq!(messages.borrow().len(), 1);
    assert!(worker.destroy());
    assert!(!worker.destroy());
    harness.advance(100);
    assert_eq!(messages.borrow().len(), 1);
    assert_eq!(detaches.borrow().len(), 1);
    assert_eq!(content_detaches.get(), 1);
    assert!(worker.url().is_none());
    assert!(
      worker
        .post_message("late")
        .unwrap_err()
        .is_destroyed()
    );
    assert!(worker.port().emit("late", &[]).unwrap_err().is_destroyed());
  }

  #[test]
  fn document_unload_and_loader_unload_destroy_workers() {
    let harness = Harness::new(ReadyState::Complete);
    let first = harness.worker(WorkerOptions::default());
    harness.document.unload();
    assert!(first.is_destroyed());
    assert!(
      ContentWorker::new(
        &harness.loader,
        harness.document.clone(),
        WorkerOptions::default(),
        Rc::new(StaticContentScriptLoader::new()),
      )
      .unwrap_err()
      .is_destroyed()
    );

    let other = Harness::new(ReadyState::Complete);
    let worker = other.worker(WorkerOptions::default());
    assert_eq!(other.loader.unloader().callback_count(), 1);
    assert!(other.loader.unload(Reason::Disable));
    assert!(worker.is_destroyed());
    assert_eq!(other.loader.contexts().live_count(), 0);
  }
}
