// Copyright 2018-2026 the Deno authors. MIT license.

//! Maps module ids to source locations.
//!
//! Absolute ids go through an ordered prefix table where the longest
//! matching prefix wins. Relative ids are resolved against the location of
//! the requesting module. A dependency manifest, when present, is consulted
//! first: it can rename requirements and flags requirements a module never
//! declared.

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

use crate::module_specifier::ModuleSpecifier;
use crate::module_specifier::resolve_import;
use crate::module_specifier::resolve_location;
use crate::modules::ModuleLoader;

const SOURCE_EXTENSIONS: [&str; 2] = [".js", ".json"];

/// Ordered `prefix -> location` table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathTable {
  entries: Vec<(String, String)>,
}

impl PathTable {
  pub fn new(paths: &IndexMap<String, String>) -> Self {
    paths
      .iter()
      .map(|(prefix, location)| (prefix.clone(), location.clone()))
      .collect()
  }

  /// Applies the longest registered prefix of `id`. Among equally long
  /// prefixes the one registered first is used.
  pub fn map(&self, id: &str) -> Option<String> {
    let mut best: Option<&(String, String)> = None;
    for entry in &self.entries {
      if id.starts_with(entry.0.as_str())
        && best.is_none_or(|best| entry.0.len() > best.0.len())
      {
        best = Some(entry);
      }
    }
    best.map(|(prefix, location)| format!("{location}{}", &id[prefix.len()..]))
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.entries.iter().map(|(p, l)| (p.as_str(), l.as_str()))
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

impl FromIterator<(String, String)> for PathTable {
  fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
    Self {
      entries: iter.into_iter().collect(),
    }
  }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
  /// `alias -> module id` for every `require` the module is known to make.
  #[serde(default)]
  pub requirements: IndexMap<String, String>,
}

/// Known dependencies per module id. A module without an entry is
/// unaudited, not forbidden.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(IndexMap<String, ManifestEntry>);

impl Manifest {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, id: impl Into<String>, entry: ManifestEntry) {
    self.0.insert(id.into(), entry);
  }

  /// Declares that module `id` requires `alias`, resolved to `target`.
  pub fn require(
    &mut self,
    id: &str,
    alias: impl Into<String>,
    target: impl Into<String>,
  ) {
    self
      .0
      .entry(id.to_string())
      .or_default()
      .requirements
      .insert(alias.into(), target.into());
  }

  pub fn get(&self, id: &str) -> Option<&ManifestEntry> {
    self.0.get(id)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
  #[error("module not found")]
  NotFound,
  #[error("{0}")]
  Denied(String),
}

/// The module asking for a dependency.
#[derive(Clone, Copy, Debug)]
pub struct Requester<'a> {
  pub id: &'a str,
  pub specifier: &'a ModuleSpecifier,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
  /// Canonical id, without source extension.
  pub id: String,
  pub specifier: ModuleSpecifier,
  /// Set when the requester did not declare this requirement.
  pub warning: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct Resolver {
  paths: PathTable,
  manifest: Manifest,
  strict: bool,
}

pub fn is_relative(id: &str) -> bool {
  id.starts_with("./") || id.starts_with("../")
}

/// Joins a relative id onto the id of the module that requested it.
pub fn join_id(base: &str, relative: &str) -> String {
  let mut parts: Vec<&str> = base.split('/').collect();
  parts.pop();
  for segment in relative.split('/') {
    match segment {
      "" | "." => {}
      ".." => {
        if matches!(parts.last(), None | Some(&".") | Some(&"..")) {
          parts.push("..");
        } else {
          parts.pop();
        }
      }
      segment => parts.push(segment),
    }
  }
  parts.join("/")
}

pub fn strip_source_extension(id: &str) -> &str {
  SOURCE_EXTENSIONS
    .iter()
    .find_map(|ext| id.strip_suffix(ext))
    .unwrap_or(id)
}

fn has_source_extension(path: &str) -> bool {
  SOURCE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn with_path(location: &ModuleSpecifier, path: &str) -> ModuleSpecifier {
  let mut url = location.clone();
  url.set_path(path);
  url
}

impl Resolver {
  pub fn new(paths: PathTable, manifest: Manifest, strict: bool) -> Self {
    Self {
      paths,
      manifest,
      strict,
    }
  }

  pub fn paths(&self) -> &PathTable {
    &self.paths
  }

  pub fn manifest(&self) -> &Manifest {
    &self.manifest
  }

  pub fn resolve(
    &self,
    id: &str,
    requester: Option<Requester>,
    source: &dyn ModuleLoader,
  ) -> Result<Resolution, ResolveError> {
    let mut id = id.to_string();
    let mut warning = None;

    // Top-level loads skip the requirement audit.
    if let Some(requester) = requester
      && let Some(entry) = self.manifest.get(requester.id)
    {
      match entry.requirements.get(&id) {
        Some(target) => id = target.clone(),
        None => {
          let message = format!(
            "Module `{}` has no authority to load `{id}`",
            requester.id
          );
          if self.strict {
            return Err(ResolveError::Denied(message));
          }
          warning = Some(message);
        }
      }
    }

    let (canonical, location) = match requester {
      Some(requester) if is_relative(&id) => {
        let location = resolve_import(&id, requester.specifier)
          .map_err(|_| ResolveError::NotFound)?;
        (join_id(requester.id, &id), location)
      }
      _ => {
        let mapped = self.paths.map(&id).ok_or(ResolveError::NotFound)?;
        let location = resolve_location(&mapped).map_err(|err| {
          log::debug!("cannot locate `{id}` at `{mapped}`: {err}");
          ResolveError::NotFound
        })?;
        (id.clone(), location)
      }
    };

    let specifier =
      probe(&location, source).ok_or(ResolveError::NotFound)?;
    Ok(Resolution {
      id: strip_source_extension(&canonical).to_string(),
      specifier,
      warning,
    })
  }
}

/// Finds the source for `location`: with a `.js` or `.json` extension added,
/// as is, then as a directory.
fn probe(
  location: &ModuleSpecifier,
  source: &dyn ModuleLoader,
) -> Option<ModuleSpecifier> {
  let path = location.path().to_string();
  if path.ends_with('/') {
    return probe_directory(location, source);
  }
  if let Some(found) = probe_file(location, source) {
    return Some(found);
  }
  probe_directory(&with_path(location, &format!("{path}/")), source)
}

fn probe_file(
  location: &ModuleSpecifier,
  source: &dyn ModuleLoader,
) -> Option<ModuleSpecifier> {
  let path = location.path();
  if !has_source_extension(path) {
    for ext in SOURCE_EXTENSIONS {
      let candidate = with_path(location, &format!("{path}{ext}"));
      if source.exists(&candidate) {
        return Some(candidate);
      }
    }
  }
  source.exists(location).then(|| location.clone())
}

/// A package manifest's `main` entry wins over `index.js`.
fn probe_directory(
  directory: &ModuleSpecifier,
  source: &dyn ModuleLoader,
) -> Option<ModuleSpecifier> {
  if let Some(main) = source.package_main(directory)
    && let Ok(target) = directory.join(&main)
    && let Some(found) = probe_file(&target, source)
  {
    return Some(found);
  }
  directory
    .join("index.js")
    .ok()
    .filter(|index| source.exists(index))
}
