// Copyright 2018-2026 the Deno authors. MIT license.

use std::collections::HashMap;

use crate::module_specifier::ModuleSpecifier;
use crate::modules::ModuleCode;
use crate::modules::ModuleSource;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModuleLoaderError {
  #[error("Module not found \"{0}\"")]
  NotFound(ModuleSpecifier),
  #[error("Unsupported module \"{0}\"")]
  Unsupported(ModuleSpecifier),
}

/// Provides module sources by location.
pub trait ModuleLoader {
  /// Given a resolved location, return the module found there. The returned
  /// source may name a different location if the request was redirected.
  fn load(
    &self,
    specifier: &ModuleSpecifier,
  ) -> Result<ModuleSource, ModuleLoaderError>;

  /// Whether `load` would find something at `specifier`. Used while probing
  /// candidate locations during resolution.
  fn exists(&self, specifier: &ModuleSpecifier) -> bool;

  /// The `main` entry of the package manifest in `directory`, if any.
  fn package_main(&self, directory: &ModuleSpecifier) -> Option<String> {
    let manifest = directory.join("package.json").ok()?;
    if !self.exists(&manifest) {
      return None;
    }
    match self.load(&manifest).ok()?.code {
      ModuleCode::Json(text) => {
        let value: serde_json::Value = serde_json::from_str(&text).ok()?;
        value.get("main")?.as_str().map(String::from)
      }
      ModuleCode::Native(_) => None,
    }
  }
}

/// Placeholder structure used when creating
/// a loader that doesn't support module loading.
pub struct NoopModuleLoader;

impl ModuleLoader for NoopModuleLoader {
  fn load(
    &self,
    specifier: &ModuleSpecifier,
  ) -> Result<ModuleSource, ModuleLoaderError> {
    Err(ModuleLoaderError::NotFound(specifier.clone()))
  }

  fn exists(&self, _specifier: &ModuleSpecifier) -> bool {
    false
  }
}

enum StaticEntry {
  Code(ModuleCode),
  Redirect(ModuleSpecifier),
}

/// Module sources registered up front by the embedder, keyed by location.
#[derive(Default)]
pub struct StaticModuleLoader {
  entries: HashMap<ModuleSpecifier, StaticEntry>,
}

// Redirect chains longer than this are treated as missing modules.
const MAX_REDIRECTS: usize = 8;

impl StaticModuleLoader {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, specifier: ModuleSpecifier, code: ModuleCode) {
    self.entries.insert(specifier, StaticEntry::Code(code));
  }

  /// Requests for `from` are answered with the module at `to`.
  pub fn redirect(&mut self, from: ModuleSpecifier, to: ModuleSpecifier) {
    self.entries.insert(from, StaticEntry::Redirect(to));
  }

  pub fn with(mut self, specifier: ModuleSpecifier, code: ModuleCode) -> Self {
    self.insert(specifier, code);
    self
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

impl ModuleLoader for StaticModuleLoader {
  fn load(
    &self,
    specifier: &ModuleSpecifier,
  ) -> Result<ModuleSource, ModuleLoaderError> {
    let mut found = specifier;
    for _ in 0..MAX_REDIRECTS {
      match self.entries.get(found) {
        Some(StaticEntry::Code(code)) => {
          return Ok(ModuleSource::new_with_redirect(
            code.clone(),
            specifier,
            found,
          ));
        }
        Some(StaticEntry::Redirect(target)) => found = target,
        None => break,
      }
    }
    Err(ModuleLoaderError::NotFound(specifier.clone()))
  }

  fn exists(&self, specifier: &ModuleSpecifier) -> bool {
    self.entries.contains_key(specifier)
  }
}

/// Loads JSON modules straight from `file:` URLs on disk and everything else
/// from the registered native modules.
///
/// Note that this loader will **block** the event loop when reading files,
/// as it uses the synchronous FS API from the standard library.
#[derive(Default)]
pub struct FsModuleLoader {
  natives: StaticModuleLoader,
}

impl FsModuleLoader {
  pub fn new(natives: StaticModuleLoader) -> Self {
    Self { natives }
  }

  fn json_path(specifier: &ModuleSpecifier) -> Option<std::path::PathBuf> {
    let path = specifier.to_file_path().ok()?;
    let is_json = path
      .extension()
      .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    is_json.then_some(path)
  }
}

impl ModuleLoader for FsModuleLoader {
  fn load(
    &self,
    specifier: &ModuleSpecifier,
  ) -> Result<ModuleSource, ModuleLoaderError> {
    if self.natives.exists(specifier) {
      return self.natives.load(specifier);
    }
    let Some(path) = Self::json_path(specifier) else {
      return Err(ModuleLoaderError::Unsupported(specifier.clone()));
    };
    let text = std::fs::read_to_string(&path).map_err(|err| {
      log::debug!("failed to read {}: {err}", path.display());
      ModuleLoaderError::NotFound(specifier.clone())
    })?;
    Ok(ModuleSource::new(ModuleCode::Json(text), specifier))
  }

  fn exists(&self, specifier: &ModuleSpecifier) -> bool {
    self.natives.exists(specifier)
      || Self::json_path(specifier).is_some_and(|path| path.is_file())
  }
}
