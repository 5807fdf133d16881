// Copyright 2018-2026 the Deno authors. MIT license.

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use crate::error::AnyError;
use crate::error::CoreError;
use crate::loader::ModuleScope;
use crate::module_specifier::ModuleSpecifier;
use crate::value::Object;
use crate::value::Value;

mod loaders;

pub use loaders::FsModuleLoader;
pub use loaders::ModuleLoader;
pub use loaders::ModuleLoaderError;
pub use loaders::NoopModuleLoader;
pub use loaders::StaticModuleLoader;

pub type ModuleId = usize;

/// A native module body. It runs once per loader with the module's scope.
pub type ModuleBody = Rc<dyn Fn(&ModuleScope) -> Result<(), AnyError>>;

#[derive(Clone)]
pub enum ModuleCode {
  Native(ModuleBody),
  /// JSON text. The parsed value becomes the module's exports.
  Json(String),
}

impl ModuleCode {
  pub fn native(
    body: impl Fn(&ModuleScope) -> Result<(), AnyError> + 'static,
  ) -> Self {
    Self::Native(Rc::new(body))
  }
}

impl fmt::Debug for ModuleCode {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      ModuleCode::Native(_) => f.write_str("Native"),
      ModuleCode::Json(text) => f.debug_tuple("Json").field(text).finish(),
    }
  }
}

/// A loaded module. `module_url_found` differs from `module_url_specified`
/// when the loader followed a redirect; both names then share one module.
#[derive(Debug, Clone)]
pub struct ModuleSource {
  pub code: ModuleCode,
  pub module_url_specified: ModuleSpecifier,
  pub module_url_found: ModuleSpecifier,
}

impl ModuleSource {
  pub fn new(code: ModuleCode, specifier: &ModuleSpecifier) -> Self {
    Self {
      code,
      module_url_specified: specifier.clone(),
      module_url_found: specifier.clone(),
    }
  }

  pub fn new_with_redirect(
    code: ModuleCode,
    specifier: &ModuleSpecifier,
    specifier_found: &ModuleSpecifier,
  ) -> Self {
    Self {
      code,
      module_url_specified: specifier.clone(),
      module_url_found: specifier_found.clone(),
    }
  }
}

/// The single slot holding a module's public interface. Every requirer
/// shares the slot, and it starts out holding an empty placeholder object
/// that the module body fills in place.
#[derive(Clone)]
pub struct ExportsCell(Rc<RefCell<Value>>);

impl Default for ExportsCell {
  fn default() -> Self {
    Self(Rc::new(RefCell::new(Object::new().into())))
  }
}

impl ExportsCell {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self) -> Value {
    self.0.borrow().clone()
  }

  /// Replaces the whole interface, like assigning `module.exports`.
  pub fn replace(&self, value: Value) -> Value {
    self.0.replace(value)
  }

  pub fn ptr_eq(&self, other: &ExportsCell) -> bool {
    Rc::ptr_eq(&self.0, &other.0)
  }
}

impl fmt::Debug for ExportsCell {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.debug_tuple("ExportsCell").field(&*self.0.borrow()).finish()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleState {
  Loading,
  Ready,
  /// The body failed. Later requires re-raise the recorded error.
  Failed(CoreError),
}

#[derive(Debug)]
pub struct ModuleDescriptor {
  pub id: String,
  pub specifier: ModuleSpecifier,
  pub exports: ExportsCell,
  pub state: ModuleState,
  children: Vec<ModuleSpecifier>,
}

impl ModuleDescriptor {
  pub fn children(&self) -> &[ModuleSpecifier] {
    &self.children
  }
}

/// A symbolic module entity.
enum SymbolicModule {
  /// This module is an alias to another module.
  /// This is useful such that multiple names could point to
  /// the same underlying module (particularly due to redirects).
  Alias(ModuleSpecifier),
  Mod(ModuleId),
}

#[derive(Default)]
/// Alias-able module name map
struct ModuleNameMap {
  inner: HashMap<ModuleSpecifier, SymbolicModule>,
}

impl ModuleNameMap {
  /// Get the id of a module.
  /// If this module is internally represented as an alias,
  /// follow the alias chain to get the final module id.
  pub fn get(&self, name: &ModuleSpecifier) -> Option<ModuleId> {
    let mut mod_name = name;
    // Guards against alias cycles.
    for _ in 0..=self.inner.len() {
      match self.inner.get(mod_name)? {
        SymbolicModule::Alias(target) => mod_name = target,
        SymbolicModule::Mod(mod_id) => return Some(*mod_id),
      }
    }
    None
  }

  pub fn insert(&mut self, name: ModuleSpecifier, id: ModuleId) {
    self.inner.insert(name, SymbolicModule::Mod(id));
  }

  pub fn alias(&mut self, name: ModuleSpecifier, target: ModuleSpecifier) {
    self.inner.insert(name, SymbolicModule::Alias(target));
  }

  pub fn is_alias(&self, name: &ModuleSpecifier) -> bool {
    matches!(self.inner.get(name), Some(SymbolicModule::Alias(_)))
  }
}

/// Every module a loader instance knows about, keyed by resolved location.
#[derive(Default)]
pub struct ModuleMap {
  info: Vec<ModuleDescriptor>,
  by_name: ModuleNameMap,
}

impl ModuleMap {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get_id(&self, name: &ModuleSpecifier) -> Option<ModuleId> {
    self.by_name.get(name)
  }

  pub fn get(&self, name: &ModuleSpecifier) -> Option<&ModuleDescriptor> {
    self.get_id(name).and_then(|id| self.info.get(id))
  }

  pub fn get_mut(
    &mut self,
    name: &ModuleSpecifier,
  ) -> Option<&mut ModuleDescriptor> {
    self.get_id(name).and_then(move |id| self.info.get_mut(id))
  }

  pub fn is_registered(&self, name: &ModuleSpecifier) -> bool {
    self.get_id(name).is_some()
  }

  /// Registers a module in the `Loading` state with a fresh placeholder
  /// exports object.
  pub fn register(&mut self, id: &str, specifier: &ModuleSpecifier) -> ModuleId {
    log::debug!("register {specifier} as `{id}`");
    let module_id = self.info.len();
    self.info.push(ModuleDescriptor {
      id: id.to_string(),
      specifier: specifier.clone(),
      exports: ExportsCell::new(),
      state: ModuleState::Loading,
      children: Vec::new(),
    });
    self.by_name.insert(specifier.clone(), module_id);
    module_id
  }

  pub fn set_state(&mut self, name: &ModuleSpecifier, state: ModuleState) {
    if let Some(module) = self.get_mut(name) {
      module.state = state;
    }
  }

  pub fn alias(&mut self, name: &ModuleSpecifier, target: &ModuleSpecifier) {
    self.by_name.alias(name.clone(), target.clone());
  }

  pub fn is_alias(&self, name: &ModuleSpecifier) -> bool {
    self.by_name.is_alias(name)
  }

  pub fn add_child(
    &mut self,
    parent: &ModuleSpecifier,
    child: &ModuleSpecifier,
  ) -> bool {
    let child = match self.get(child) {
      Some(module) => module.specifier.clone(),
      None => child.clone(),
    };
    self
      .get_mut(parent)
      .map(move |module| {
        if !module.children.contains(&child) {
          module.children.push(child);
        }
      })
      .is_some()
  }

  pub fn get_children(&self, name: &ModuleSpecifier) -> Option<&[ModuleSpecifier]> {
    self.get(name).map(|module| module.children())
  }

  pub fn len(&self) -> usize {
    self.info.len()
  }

  pub fn is_empty(&self) -> bool {
    self.info.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &ModuleDescriptor> {
    self.info.iter()
  }

  /// Forgets every module and hands the descriptors to the caller, so their
  /// exports can be dropped outside any borrow of the map.
  pub fn clear(&mut self) -> Vec<ModuleDescriptor> {
    self.by_name = ModuleNameMap::default();
    std::mem::take(&mut self.info)
  }

  pub fn deps(&self, name: &ModuleSpecifier) -> Option<Deps> {
    Deps::new(self, name)
  }
}

/// This is a tree structure representing the dependencies of a given module.
/// Use ModuleMap::deps to construct it. The 'deps' member is None if this
/// module was already seen elsewhere in the tree.
#[derive(Debug, PartialEq)]
pub struct Deps {
  pub name: String,
  pub deps: Option<Vec<Deps>>,
  prefix: String,
  is_last: bool,
}

impl Deps {
  fn new(modules: &ModuleMap, name: &ModuleSpecifier) -> Option<Deps> {
    let mut seen = HashSet::new();
    Self::helper(&mut seen, "".to_string(), true, modules, name)
  }

  fn helper(
    seen: &mut HashSet<ModuleSpecifier>,
    prefix: String,
    is_last: bool,
    modules: &ModuleMap,
    url: &ModuleSpecifier,
  ) -> Option<Deps> {
    if seen.contains(url) {
      Some(Deps {
        name: url.to_string(),
        prefix,
        deps: None,
        is_last,
      })
    } else {
      let children = modules.get_children(url)?;
      seen.insert(url.clone());
      let child_count = children.len();
      let deps: Vec<Deps> = children
        .iter()
        .enumerate()
        .map(|(index, dep_url)| {
          let new_is_last = index == child_count - 1;
          let mut new_prefix = prefix.clone();
          new_prefix.push(if is_last { ' ' } else { '│' });
          new_prefix.push(' ');

          Self::helper(seen, new_prefix, new_is_last, modules, dep_url)
        })
        // If any of the children are missing, return None.
        .collect::<Option<_>>()?;

      Some(Deps {
        name: url.to_string(),
        prefix,
        deps: Some(deps),
        is_last,
      })
    }
  }

  pub fn to_json(&self) -> String {
    let children = self
      .deps
      .iter()
      .flatten()
      .map(|d| d.to_json())
      .collect::<Vec<_>>()
      .join(",");
    let name = serde_json::Value::String(self.name.clone());
    format!("[{name},[{children}]]")
  }
}

impl fmt::Display for Deps {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let has_children = self.deps.as_ref().is_some_and(|d| !d.is_empty());
    write!(
      f,
      "{}{}─{} {}",
      self.prefix,
      if self.is_last { "└" } else { "├" },
      if has_children { "┬" } else { "─" },
      self.name
    )?;

    if let Some(ref deps) = self.deps {
      for d in deps {
        write!(f, "\n{d}")?;
      }
    }
    Ok(())
  }
}
