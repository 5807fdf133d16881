// Copyright 2018-2026 the Deno authors. MIT license.

//! Isolated execution contexts.
//!
//! Contexts live in an arena owned by a [`ContextFactory`]. A handle carries
//! the slot index plus the generation it was created with; destroying a
//! context bumps the slot generation, so every outstanding handle fails with
//! `DestroyedContextAccess` from then on, even after the slot is reused.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::console::Console;
use crate::error::CoreError;
use crate::pipe::PipeEnd;
use crate::timers::Timers;
use crate::unload::Unloader;
use crate::value::Function;
use crate::value::Value;

#[derive(Clone, Debug, Default)]
pub struct ContextOptions {
  pub label: String,
  /// Restricted contexts cannot be granted the module system or any other
  /// privileged capability. They talk to the host through a pipe only.
  pub restricted: bool,
}

/// Everything a context can reach. Contexts start empty; each capability is
/// handed in explicitly at creation.
#[derive(Clone, Default)]
pub struct Capabilities {
  pub console: Option<Console>,
  pub timers: Option<Timers>,
  pub require: Option<Function>,
  pub pipe: Option<PipeEnd>,
  pub unloader: Option<Unloader>,
  pub chrome: Option<Value>,
  pub globals: IndexMap<String, Value>,
}

impl Capabilities {
  fn privileged(&self) -> Vec<&'static str> {
    let mut names = Vec::new();
    if self.require.is_some() {
      names.push("require");
    }
    if self.unloader.is_some() {
      names.push("unloader");
    }
    if self.chrome.is_some() {
      names.push("chrome");
    }
    names
  }
}

struct ContextState {
  restricted: bool,
  capabilities: Capabilities,
}

struct Slot {
  generation: u32,
  state: Option<ContextState>,
}

#[derive(Default)]
struct Arena {
  slots: Vec<Slot>,
  free: Vec<usize>,
}

/// Creates contexts and keeps track of every one it created.
#[derive(Clone, Default)]
pub struct ContextFactory(Rc<RefCell<Arena>>);

impl ContextFactory {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn create(
    &self,
    options: ContextOptions,
    capabilities: Capabilities,
  ) -> Result<ExecutionContext, CoreError> {
    if options.restricted {
      let privileged = capabilities.privileged();
      if !privileged.is_empty() {
        return Err(CoreError::AccessDenied(format!(
          "Restricted context `{}` cannot be granted: {}",
          options.label,
          privileged.join(", ")
        )));
      }
    }

    let state = ContextState {
      restricted: options.restricted,
      capabilities,
    };
    let mut arena = self.0.borrow_mut();
    let index = match arena.free.pop() {
      Some(index) => {
        arena.slots[index].state = Some(state);
        index
      }
      None => {
        arena.slots.push(Slot {
          generation: 0,
          state: Some(state),
        });
        arena.slots.len() - 1
      }
    };
    let generation = arena.slots[index].generation;
    log::trace!("created context `{}` ({index}/{generation})", options.label);
    Ok(ExecutionContext {
      arena: self.0.clone(),
      index,
      generation,
      label: options.label.into(),
    })
  }

  pub fn live_count(&self) -> usize {
    self
      .0
      .borrow()
      .slots
      .iter()
      .filter(|slot| slot.state.is_some())
      .count()
  }

  /// Destroys every live context. Returns how many were destroyed.
  pub fn destroy_all(&self) -> usize {
    let states = {
      let mut arena = self.0.borrow_mut();
      let mut states = Vec::new();
      let mut freed = Vec::new();
      for (index, slot) in arena.slots.iter_mut().enumerate() {
        if let Some(state) = slot.state.take() {
          slot.generation = slot.generation.wrapping_add(1);
          states.push(state);
          freed.push(index);
        }
      }
      arena.free.extend(freed);
      states
    };
    // Capabilities are dropped outside the arena borrow.
    let count = states.len();
    drop(states);
    count
  }
}

/// A handle to a context. Cheap to clone; all clones observe destruction.
#[derive(Clone)]
pub struct ExecutionContext {
  arena: Rc<RefCell<Arena>>,
  index: usize,
  generation: u32,
  label: Rc<str>,
}

impl fmt::Debug for ExecutionContext {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.debug_struct("ExecutionContext")
      .field("label", &self.label)
      .field("index", &self.index)
      .field("generation", &self.generation)
      .finish()
  }
}

impl ExecutionContext {
  pub fn label(&self) -> &str {
    &self.label
  }

  fn with_state<R>(
    &self,
    f: impl FnOnce(&mut ContextState) -> R,
  ) -> Result<R, CoreError> {
    let mut arena = self.arena.borrow_mut();
    match arena.slots.get_mut(self.index) {
      Some(Slot {
        generation,
        state: Some(state),
      }) if *generation == self.generation => Ok(f(state)),
      _ => Err(CoreError::destroyed(format_args!(
        "Context `{}`",
        self.label
      ))),
    }
  }

  pub fn is_destroyed(&self) -> bool {
    self.with_state(|_| ()).is_err()
  }

  pub fn is_restricted(&self) -> Result<bool, CoreError> {
    self.with_state(|state| state.restricted)
  }

  pub fn get(&self, name: &str) -> Result<Value, CoreError> {
    self.with_state(|state| {
      state
        .capabilities
        .globals
        .get(name)
        .cloned()
        .unwrap_or_default()
    })
  }

  pub fn set(&self, name: &str, value: Value) -> Result<(), CoreError> {
    let previous = self.with_state(|state| {
      state.capabilities.globals.insert(name.to_string(), value)
    })?;
    drop(previous);
    Ok(())
  }

  pub fn capabilities(&self) -> Result<Capabilities, CoreError> {
    self.with_state(|state| state.capabilities.clone())
  }

  pub fn with_capabilities<R>(
    &self,
    f: impl FnOnce(&Capabilities) -> R,
  ) -> Result<R, CoreError> {
    self.with_state(|state| f(&state.capabilities))
  }

  /// Runs `f` on behalf of this context. The context may be destroyed while
  /// `f` runs; later calls on it then fail.
  pub fn evaluate<R>(&self, f: impl FnOnce() -> R) -> Result<R, CoreError> {
    self.with_state(|_| ())?;
    Ok(f())
  }

  /// Returns `false` if the context was already destroyed.
  pub fn destroy(&self) -> bool {
    let state = {
      let mut arena = self.arena.borrow_mut();
      let slot = match arena.slots.get_mut(self.index) {
        Some(slot) if slot.generation == self.generation => slot,
        _ => return false,
      };
      let Some(state) = slot.state.take() else {
        return false;
      };
      slot.generation = slot.generation.wrapping_add(1);
      arena.free.push(self.index);
      state
    };
    log::trace!("destroyed context `{}`", self.label);
    drop(state);
    true
  }
}
