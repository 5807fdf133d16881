// Copyright 2018-2026 the Deno authors. MIT license.

//! The CommonJS-style module loader.
//!
//! Each loader instance owns a module map keyed by resolved location, the
//! contexts its modules run in and the unload registry. A module body runs at
//! most once per loader; a `require` that arrives while the module is still
//! evaluating (a cycle) gets the placeholder exports object that the body is
//! filling in.

use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::console::Console;
use crate::context::Capabilities;
use crate::context::ContextFactory;
use crate::context::ContextOptions;
use crate::context::ExecutionContext;
use crate::error::AnyError;
use crate::error::CoreError;
use crate::error::EvaluationError;
use crate::error::Exception;
use crate::error::StackFrame;
use crate::error::type_error;
use crate::event_loop::EventLoop;
use crate::event_loop::TimerId;
use crate::module_specifier::ModuleSpecifier;
use crate::module_specifier::resolve_location;
use crate::modules::Deps;
use crate::modules::ExportsCell;
use crate::modules::ModuleCode;
use crate::modules::ModuleLoader;
use crate::modules::ModuleMap;
use crate::modules::ModuleState;
use crate::resolver::Manifest;
use crate::resolver::PathTable;
use crate::resolver::Requester;
use crate::resolver::ResolveError;
use crate::resolver::Resolver;
use crate::timers::Timers;
use crate::unload::Reason;
use crate::unload::Unloader;
use crate::value::Function;
use crate::value::Value;

pub const DEFAULT_UNLOAD_GRACE_MS: u64 = 1000;

/// Id of the pseudo-module that hands out the privileged host capability.
pub const CHROME_MODULE: &str = "chrome";

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoaderOptions {
  /// Prefix -> location. Order matters only between equally long prefixes.
  pub paths: IndexMap<String, String>,
  pub manifest: Manifest,
  pub id: String,
  pub name: String,
  pub version: String,
  #[serde(rename = "rootURI")]
  pub root_uri: Option<String>,
  /// Module ids answered with these values instead of being loaded.
  #[serde(skip)]
  pub modules: IndexMap<String, Value>,
  /// Module ids (or id prefixes ending in `/`) that may require `chrome`.
  pub privileged: Vec<String>,
  /// Fail undeclared requirements instead of warning about them.
  pub strict_requirements: bool,
  /// Delay between the logical unload and the destruction of contexts.
  pub unload_grace_ms: u64,
}

impl Default for LoaderOptions {
  fn default() -> Self {
    Self {
      paths: IndexMap::new(),
      manifest: Manifest::default(),
      id: String::new(),
      name: String::new(),
      version: String::new(),
      root_uri: None,
      modules: IndexMap::new(),
      privileged: Vec::new(),
      strict_requirements: false,
      unload_grace_ms: DEFAULT_UNLOAD_GRACE_MS,
    }
  }
}

impl LoaderOptions {
  pub fn validate(&self) -> Result<(), CoreError> {
    for (prefix, location) in &self.paths {
      resolve_location(location).map_err(|err| {
        CoreError::InvalidOption(format!("paths[\"{prefix}\"]: {err}"))
      })?;
    }
    if let Some(root_uri) = &self.root_uri {
      resolve_location(root_uri).map_err(|err| {
        CoreError::InvalidOption(format!("rootURI: {err}"))
      })?;
    }
    Ok(())
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoaderPhase {
  Active,
  /// Teardown callbacks ran, contexts are still alive.
  Unloaded,
  Destroyed,
}

struct LoaderInner {
  options: LoaderOptions,
  resolver: Resolver,
  source: Rc<dyn ModuleLoader>,
  event_loop: EventLoop,
  modules: RefCell<ModuleMap>,
  contexts: ContextFactory,
  unloader: Unloader,
  timers: Timers,
  console: RefCell<Console>,
  chrome: RefCell<Option<Value>>,
  eval_stack: RefCell<Vec<StackFrame>>,
  phase: Cell<LoaderPhase>,
  destroy_timer: Cell<Option<TimerId>>,
}

#[derive(Clone)]
pub struct Loader(Rc<LoaderInner>);

/// Pops the frames an evaluation pushed, however it ends.
struct EvalFrames<'a> {
  stack: &'a RefCell<Vec<StackFrame>>,
  depth: usize,
}

impl Drop for EvalFrames<'_> {
  fn drop(&mut self) {
    self.stack.borrow_mut().truncate(self.depth);
  }
}

impl Loader {
  pub fn new(
    options: LoaderOptions,
    source: Rc<dyn ModuleLoader>,
    event_loop: EventLoop,
  ) -> Result<Self, CoreError> {
    options.validate()?;
    let resolver = Resolver::new(
      PathTable::new(&options.paths),
      options.manifest.clone(),
      options.strict_requirements,
    );
    let console_name = if options.name.is_empty() {
      options.id.as_str()
    } else {
      options.name.as_str()
    };
    let console = Console::new(console_name);
    let timers = Timers::new(event_loop.clone());
    Ok(Self(Rc::new(LoaderInner {
      resolver,
      source,
      event_loop,
      modules: RefCell::new(ModuleMap::new()),
      contexts: ContextFactory::new(),
      unloader: Unloader::new(),
      timers,
      console: RefCell::new(console),
      chrome: RefCell::new(None),
      eval_stack: RefCell::new(Vec::new()),
      phase: Cell::new(LoaderPhase::Active),
      destroy_timer: Cell::new(None),
      options,
    })))
  }

  pub fn options(&self) -> &LoaderOptions {
    &self.0.options
  }

  pub fn event_loop(&self) -> &EventLoop {
    &self.0.event_loop
  }

  /// Registry of every context this loader owns. Contexts created here are
  /// destroyed together with the loader.
  pub fn contexts(&self) -> &ContextFactory {
    &self.0.contexts
  }

  pub fn unloader(&self) -> &Unloader {
    &self.0.unloader
  }

  pub fn timers(&self) -> &Timers {
    &self.0.timers
  }

  pub fn console(&self) -> Console {
    self.0.console.borrow().clone()
  }

  /// Console handed to modules evaluated from now on.
  pub fn set_console(&self, console: Console) {
    *self.0.console.borrow_mut() = console;
  }

  /// The value privileged modules get from `require("chrome")`.
  pub fn set_chrome(&self, chrome: Value) {
    *self.0.chrome.borrow_mut() = Some(chrome);
  }

  pub fn phase(&self) -> LoaderPhase {
    self.0.phase.get()
  }

  pub fn with_modules<R>(&self, f: impl FnOnce(&ModuleMap) -> R) -> R {
    f(&self.0.modules.borrow())
  }

  pub fn deps(&self, specifier: &ModuleSpecifier) -> Option<Deps> {
    self.0.modules.borrow().deps(specifier)
  }

  pub fn is_privileged(&self, id: &str) -> bool {
    self.0.options.privileged.iter().any(|allowed| {
      allowed == id || (allowed.ends_with('/') && id.starts_with(allowed))
    })
  }

  /// Top-level load of the entry module. The requirement audit is skipped.
  pub fn main(&self, id: &str) -> Result<Value, CoreError> {
    self.require(id, None)
  }

  /// Returns the exports of module `id` as seen from the module at `from`,
  /// loading and evaluating it first if needed.
  pub fn require(
    &self,
    id: &str,
    from: Option<&ModuleSpecifier>,
  ) -> Result<Value, CoreError> {
    if self.phase() == LoaderPhase::Destroyed {
      return Err(CoreError::destroyed("Loader"));
    }
    let requester_id = from.map(|specifier| {
      self
        .0
        .modules
        .borrow()
        .get(specifier)
        .map(|module| module.id.clone())
        .unwrap_or_else(|| specifier.to_string())
    });

    if id == CHROME_MODULE {
      return self.require_chrome(requester_id.as_deref(), from);
    }
    if let Some(value) = self.0.options.modules.get(id) {
      return Ok(value.clone());
    }

    let requester = from
      .zip(requester_id.as_deref())
      .map(|(specifier, id)| Requester { id, specifier });
    let resolution = self
      .0
      .resolver
      .resolve(id, requester, &*self.0.source)
      .map_err(|err| match err {
        ResolveError::NotFound => CoreError::ModuleNotFound {
          specifier: id.to_string(),
          requester: from.map(|s| s.to_string()),
        },
        ResolveError::Denied(message) => CoreError::AccessDenied(message),
      })?;
    if let Some(warning) = &resolution.warning {
      log::warn!("{warning}");
    }
    self.load_module(&resolution.id, &resolution.specifier, from)
  }

  fn require_chrome(
    &self,
    requester_id: Option<&str>,
    from: Option<&ModuleSpecifier>,
  ) -> Result<Value, CoreError> {
    match requester_id {
      Some(requester_id) if self.is_privileged(requester_id) => {
        self.0.chrome.borrow().clone().ok_or_else(|| {
          CoreError::ModuleNotFound {
            specifier: CHROME_MODULE.to_string(),
            requester: from.map(|s| s.to_string()),
          }
        })
      }
      requester_id => Err(CoreError::AccessDenied(format!(
        "Module `{}` is not allowed to require `{CHROME_MODULE}`",
        requester_id.unwrap_or("<main>")
      ))),
    }
  }

  fn load_module(
    &self,
    id: &str,
    specifier: &ModuleSpecifier,
    parent: Option<&ModuleSpecifier>,
  ) -> Result<Value, CoreError> {
    // The placeholder of a module that is still evaluating is returned as
    // is. This is what breaks require cycles.
    let cached = self.0.modules.borrow().get(specifier).map(|module| {
      (
        module.specifier.clone(),
        module.state.clone(),
        module.exports.get(),
      )
    });
    if let Some((found, state, exports)) = cached {
      if let Some(parent) = parent {
        self.0.modules.borrow_mut().add_child(parent, &found);
      }
      return match state {
        ModuleState::Failed(err) => Err(err),
        ModuleState::Loading | ModuleState::Ready => Ok(exports),
      };
    }

    let source = self.0.source.load(specifier).map_err(|err| {
      log::debug!("{err}");
      CoreError::ModuleNotFound {
        specifier: id.to_string(),
        requester: parent.map(|s| s.to_string()),
      }
    })?;
    let found = &source.module_url_found;

    let exports = {
      let mut modules = self.0.modules.borrow_mut();
      if found != specifier {
        modules.alias(specifier, found);
        if modules.is_registered(found) {
          drop(modules);
          return self.load_module(id, found, parent);
        }
      }
      modules.register(id, found);
      if let Some(parent) = parent {
        modules.add_child(parent, found);
      }
      match modules.get(found) {
        Some(module) => module.exports.clone(),
        None => ExportsCell::new(),
      }
    };

    let result = self.evaluate(id, found, &exports, source.code);
    let mut modules = self.0.modules.borrow_mut();
    match result {
      Ok(()) => {
        modules.set_state(found, ModuleState::Ready);
        Ok(exports.get())
      }
      Err(err) => {
        modules.set_state(found, ModuleState::Failed(err.clone()));
        Err(err)
      }
    }
  }

  fn push_frames(&self, specifier: &ModuleSpecifier) -> EvalFrames<'_> {
    let mut stack = self.0.eval_stack.borrow_mut();
    let depth = stack.len();
    stack.push(StackFrame::internal("Loader.require"));
    stack.push(StackFrame::from_location(
      Some(specifier.to_string()),
      None,
      None,
    ));
    EvalFrames {
      stack: &self.0.eval_stack,
      depth,
    }
  }

  fn evaluate(
    &self,
    id: &str,
    specifier: &ModuleSpecifier,
    exports: &ExportsCell,
    code: ModuleCode,
  ) -> Result<(), CoreError> {
    let _frames = self.push_frames(specifier);
    log::debug!("evaluating {specifier}");
    let result = match code {
      ModuleCode::Json(text) => serde_json::from_str(&text)
        .map(|json: serde_json::Value| {
          exports.replace(Value::from_json(&json));
        })
        .map_err(AnyError::from),
      ModuleCode::Native(body) => {
        let context = self.create_module_context(id, specifier)?;
        let scope = ModuleScope {
          id: id.into(),
          specifier: specifier.clone(),
          context: context.clone(),
          exports: exports.clone(),
        };
        context.evaluate(|| body(&scope))?
      }
    };
    result.map_err(|err| self.translate_error(specifier, err))
  }

  fn create_module_context(
    &self,
    id: &str,
    specifier: &ModuleSpecifier,
  ) -> Result<ExecutionContext, CoreError> {
    let weak = Rc::downgrade(&self.0);
    let requester = specifier.clone();
    let require = Function::new(move |args| {
      let id = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| type_error("require() expects a module id string"))?;
      let loader = weak
        .upgrade()
        .map(Loader)
        .ok_or_else(|| CoreError::destroyed("Loader"))?;
      Ok(loader.require(id, Some(&requester))?)
    });
    let chrome = if self.is_privileged(id) {
      self.0.chrome.borrow().clone()
    } else {
      None
    };
    let mut globals = IndexMap::new();
    globals.insert("__URI__".to_string(), specifier.to_string().into());
    let capabilities = Capabilities {
      console: Some(self.console()),
      timers: Some(self.0.timers.clone()),
      require: Some(require),
      pipe: None,
      unloader: Some(self.0.unloader.clone()),
      chrome,
      globals,
    };
    self.0.contexts.create(
      ContextOptions {
        label: specifier.to_string(),
        restricted: false,
      },
      capabilities,
    )
  }

  /// Errors that already went through this boundary deeper down keep their
  /// frames. Anything else is an exception raised by this module's body.
  fn translate_error(
    &self,
    specifier: &ModuleSpecifier,
    err: AnyError,
  ) -> CoreError {
    match err.downcast::<CoreError>() {
      Ok(err) => err,
      Err(err) => {
        let exception = Exception::from_error(&err);
        let mut frames: Vec<StackFrame> =
          self.0.eval_stack.borrow().iter().rev().cloned().collect();
        if let Some(top) = frames.iter_mut().find(|f| !f.is_internal) {
          top.line_number = exception.line_number;
          top.column_number = exception.column_number;
        }
        frames.retain(|frame| !frame.is_internal);
        EvaluationError {
          specifier: specifier.clone(),
          name: exception.name.to_string(),
          message: exception.message,
          line_number: exception.line_number,
          column_number: exception.column_number,
          frames,
        }
        .into()
      }
    }
  }

  /// Logical unload: cancels loader timers, runs every teardown callback
  /// with `reason` and schedules [`Loader::destroy`] after the grace delay.
  /// Returns `false` if the loader was already unloaded.
  pub fn unload(&self, reason: Reason) -> bool {
    if self.phase() != LoaderPhase::Active {
      return false;
    }
    self.0.phase.set(LoaderPhase::Unloaded);
    log::debug!("unloading `{}` ({reason})", self.0.options.id);
    self.0.timers.clear_all();
    self.0.unloader.unload(reason);

    let weak = Rc::downgrade(&self.0);
    let grace = Duration::from_millis(self.0.options.unload_grace_ms);
    let id = self.0.event_loop.set_timeout(grace, move || {
      if let Some(inner) = weak.upgrade() {
        Loader(inner).destroy();
      }
    });
    self.0.destroy_timer.set(Some(id));
    true
  }

  /// Hard destroy: drops every module's exports and destroys every context
  /// owned by this loader. An active loader runs its teardown callbacks
  /// first, with [`Reason::Unknown`]. Idempotent.
  pub fn destroy(&self) -> bool {
    match self.phase() {
      LoaderPhase::Destroyed => return false,
      LoaderPhase::Active => {
        self.0.phase.set(LoaderPhase::Unloaded);
        self.0.unloader.unload(Reason::Unknown);
      }
      LoaderPhase::Unloaded => {}
    }
    self.0.phase.set(LoaderPhase::Destroyed);
    if let Some(id) = self.0.destroy_timer.take() {
      self.0.event_loop.clear_timer(id);
    }
    self.0.timers.clear_all();
    let modules = self.0.modules.borrow_mut().clear();
    let module_count = modules.len();
    drop(modules);
    self.0.chrome.borrow_mut().take();
    let context_count = self.0.contexts.destroy_all();
    log::debug!(
      "destroyed `{}`: {module_count} modules, {context_count} contexts",
      self.0.options.id
    );
    true
  }
}

/// Free-function form of [`Loader::main`].
pub fn main(loader: &Loader, id: &str) -> Result<Value, CoreError> {
  loader.main(id)
}

/// What a module body sees: its own identity, `require`, the shared exports
/// cell and the capabilities of its context.
#[derive(Clone)]
pub struct ModuleScope {
  id: Rc<str>,
  specifier: ModuleSpecifier,
  context: ExecutionContext,
  exports: ExportsCell,
}

impl ModuleScope {
  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn specifier(&self) -> &ModuleSpecifier {
    &self.specifier
  }

  pub fn context(&self) -> &ExecutionContext {
    &self.context
  }

  pub fn require(&self, id: &str) -> Result<Value, AnyError> {
    let require = self
      .context
      .with_capabilities(|c| c.require.clone())?
      .ok_or_else(|| missing_capability("require", &self.context))?;
    require.call(&[id.into()])
  }

  /// The current exports value. During a require cycle this is the
  /// placeholder other modules already hold.
  pub fn exports(&self) -> Value {
    self.exports.get()
  }

  /// `exports[name] = value`
  pub fn export(
    &self,
    name: &str,
    value: impl Into<Value>,
  ) -> Result<(), AnyError> {
    match self.exports.get() {
      Value::Object(object) => {
        if object.set(name, value) {
          Ok(())
        } else {
          Err(type_error(format!(
            "Cannot assign to read only property `{name}` of exports"
          )))
        }
      }
      other => Err(type_error(format!(
        "Cannot set property `{name}` on exports of type {}",
        other.type_of()
      ))),
    }
  }

  /// `module.exports = value`
  pub fn set_exports(&self, value: impl Into<Value>) {
    self.exports.replace(value.into());
  }

  pub fn console(&self) -> Result<Console, AnyError> {
    self
      .context
      .with_capabilities(|c| c.console.clone())?
      .ok_or_else(|| missing_capability("console", &self.context))
  }

  pub fn timers(&self) -> Result<Timers, AnyError> {
    self
      .context
      .with_capabilities(|c| c.timers.clone())?
      .ok_or_else(|| missing_capability("timers", &self.context))
  }

  pub fn unloader(&self) -> Result<Unloader, AnyError> {
    self
      .context
      .with_capabilities(|c| c.unloader.clone())?
      .ok_or_else(|| missing_capability("unloader", &self.context))
  }

  pub fn global(&self, name: &str) -> Result<Value, AnyError> {
    Ok(self.context.get(name)?)
  }

  pub fn set_global(
    &self,
    name: &str,
    value: impl Into<Value>,
  ) -> Result<(), AnyError> {
    Ok(self.context.set(name, value.into())?)
  }
}

fn missing_capability(name: &str, context: &ExecutionContext) -> AnyError {
  CoreError::AccessDenied(format!(
    "`{name}` is not available in {}",
    context.label()
  ))
  .into()
}
