// Copyright 2018-2026 the Deno authors. MIT license.

use std::cell::Cell;
use std::cell::RefCell;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::rc::Rc;
use std::rc::Weak;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::error::AnyError;
use crate::error::CoreError;

/// Why an add-on lifecycle transition happens. The numeric codes are the
/// ones hosts pass to bootstrap hooks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reason {
  Unknown,
  Startup,
  Shutdown,
  Enable,
  Disable,
  Install,
  Uninstall,
  Upgrade,
  Downgrade,
}

const REASONS: [Reason; 9] = [
  Reason::Unknown,
  Reason::Startup,
  Reason::Shutdown,
  Reason::Enable,
  Reason::Disable,
  Reason::Install,
  Reason::Uninstall,
  Reason::Upgrade,
  Reason::Downgrade,
];

impl Reason {
  pub fn from_code(code: u32) -> Option<Reason> {
    REASONS.get(code as usize).copied()
  }

  pub fn code(self) -> u32 {
    self as u32
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Reason::Unknown => "unknown",
      Reason::Startup => "startup",
      Reason::Shutdown => "shutdown",
      Reason::Enable => "enable",
      Reason::Disable => "disable",
      Reason::Install => "install",
      Reason::Uninstall => "uninstall",
      Reason::Upgrade => "upgrade",
      Reason::Downgrade => "downgrade",
    }
  }
}

impl fmt::Display for Reason {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Reason {
  type Err = CoreError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    REASONS
      .iter()
      .copied()
      .find(|reason| reason.as_str() == s)
      .ok_or_else(|| CoreError::InvalidOption(format!("unknown reason `{s}`")))
  }
}

pub type UnloadCallback = Rc<dyn Fn(Reason) -> Result<(), AnyError>>;

/// Objects that know how to tear themselves down. See [`Unloader::ensure`].
pub trait Disposable {
  fn unload(&self, reason: Reason) -> Result<(), AnyError>;
}

struct EnsuredInner {
  owner: RefCell<Option<Rc<dyn Disposable>>>,
  owner_ptr: *const (),
  callback: RefCell<Option<UnloadCallback>>,
  unloader: Weak<UnloaderInner>,
}

/// Handle returned by [`Unloader::ensure`]. Calling [`Ensured::unload`] runs
/// the owner's destructor at most once and unregisters it.
#[derive(Clone)]
pub struct Ensured(Rc<EnsuredInner>);

impl Ensured {
  pub fn unload(&self, reason: Reason) -> Result<(), AnyError> {
    let Some(owner) = self.0.owner.borrow_mut().take() else {
      return Ok(());
    };
    if let (Some(callback), Some(unloader)) =
      (self.0.callback.borrow_mut().take(), self.0.unloader.upgrade())
    {
      Unloader(unloader).remove(&callback);
    }
    owner.unload(reason)
  }

  pub fn is_unloaded(&self) -> bool {
    self.0.owner.borrow().is_none()
  }

  pub fn ptr_eq(&self, other: &Ensured) -> bool {
    Rc::ptr_eq(&self.0, &other.0)
  }
}

#[derive(Default)]
struct UnloaderInner {
  callbacks: RefCell<Vec<UnloadCallback>>,
  ensured: RefCell<Vec<Ensured>>,
  unloaded: Cell<Option<Reason>>,
}

/// Registry of teardown callbacks for one loader.
#[derive(Clone, Default)]
pub struct Unloader(Rc<UnloaderInner>);

impl Unloader {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers `callback`. Registering the same callback again is a no-op,
  /// as is registering anything after unload. Returns whether it was added.
  pub fn when(&self, callback: UnloadCallback) -> bool {
    if self.0.unloaded.get().is_some() {
      log::debug!("ignoring unload callback registered after unload");
      return false;
    }
    let mut callbacks = self.0.callbacks.borrow_mut();
    if callbacks.iter().any(|c| Rc::ptr_eq(c, &callback)) {
      return false;
    }
    callbacks.push(callback);
    true
  }

  pub fn remove(&self, callback: &UnloadCallback) -> bool {
    let mut callbacks = self.0.callbacks.borrow_mut();
    let len = callbacks.len();
    callbacks.retain(|c| !Rc::ptr_eq(c, callback));
    callbacks.len() != len
  }

  pub fn callback_count(&self) -> usize {
    self.0.callbacks.borrow().len()
  }

  /// Arranges for `owner.unload(reason)` to run when this unloader runs, or
  /// earlier through the returned handle. Ensuring the same owner twice
  /// returns the existing handle.
  pub fn ensure<T: Disposable + 'static>(&self, owner: &Rc<T>) -> Ensured {
    let owner_ptr = Rc::as_ptr(owner) as *const ();
    if let Some(existing) = self
      .0
      .ensured
      .borrow()
      .iter()
      .find(|e| e.0.owner_ptr == owner_ptr && !e.is_unloaded())
    {
      return existing.clone();
    }

    let owner: Rc<dyn Disposable> = owner.clone();
    let ensured = Ensured(Rc::new(EnsuredInner {
      owner: RefCell::new(Some(owner)),
      owner_ptr,
      callback: RefCell::new(None),
      unloader: Rc::downgrade(&self.0),
    }));
    let weak = Rc::downgrade(&ensured.0);
    let callback: UnloadCallback = Rc::new(move |reason: Reason| {
      match weak.upgrade() {
        Some(inner) => Ensured(inner).unload(reason),
        None => Ok(()),
      }
    });
    *ensured.0.callback.borrow_mut() = Some(callback.clone());
    self.when(callback);
    let mut list = self.0.ensured.borrow_mut();
    list.retain(|e| !e.is_unloaded());
    list.push(ensured.clone());
    ensured
  }

  /// Runs every registered callback once with `reason` and clears the
  /// registry. A failing or panicking callback is logged and does not stop
  /// the others. Returns `false` if this unloader already ran.
  pub fn unload(&self, reason: Reason) -> bool {
    if self.0.unloaded.get().is_some() {
      return false;
    }
    self.0.unloaded.set(Some(reason));
    let callbacks = std::mem::take(&mut *self.0.callbacks.borrow_mut());
    log::debug!("unloading {} callbacks ({reason})", callbacks.len());
    for callback in callbacks {
      match catch_unwind(AssertUnwindSafe(|| callback(reason))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => log::error!("Error while unloading: {err:#}"),
        Err(panic) => {
          let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
          log::error!("Unload callback panicked: {message}");
        }
      }
    }
    self.0.ensured.borrow_mut().clear();
    true
  }

  pub fn unloaded_reason(&self) -> Option<Reason> {
    self.0.unloaded.get()
  }

  pub fn is_unloaded(&self) -> bool {
    self.0.unloaded.get().is_some()
  }
}
