// Copyright 2018-2026 the Deno authors. MIT license.

//! `harness-options.json`, the build-time description of an add-on that is
//! read at startup.

use std::path::Path;

use anyhow::Context;
use indexmap::IndexMap;
use jetpack_core::AnyError;
use jetpack_core::CHROME_MODULE;
use jetpack_core::Manifest;
use jetpack_core::ManifestEntry;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;

pub const HARNESS_OPTIONS_FILE: &str = "harness-options.json";

static LIB_SEGMENT_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"([^/]*)/lib").unwrap());
static JS_EXTENSION_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"\.js$").unwrap());
static UUID_ID_RE: Lazy<Regex> = Lazy::new(|| {
  Regex::new(
    r"^\{([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})\}$",
  )
  .unwrap()
});

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageMetadata {
  #[serde(default)]
  pub version: String,
  #[serde(default)]
  pub main: Option<String>,
  #[serde(flatten)]
  pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct RequirementV1 {
  /// Missing for pseudo-modules such as `chrome`.
  #[serde(default)]
  pub path: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ManifestEntryV1 {
  #[serde(default)]
  pub requirements: IndexMap<String, RequirementV1>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarnessOptions {
  #[serde(rename = "jetpackID")]
  pub jetpack_id: String,
  pub name: String,
  #[serde(default)]
  pub metadata: IndexMap<String, PackageMetadata>,
  /// Keyed by source path, e.g. `addon/lib/main.js`.
  #[serde(default)]
  pub manifest: IndexMap<String, ManifestEntryV1>,
  pub main_path: String,
  #[serde(default)]
  pub loader: Option<String>,
  #[serde(default)]
  pub static_args: serde_json::Value,
  /// Module ids allowed to require `chrome` on top of the ones whose
  /// manifest entry asks for it.
  #[serde(default)]
  pub privileged: Vec<String>,
  #[serde(default)]
  pub strict_requirements: bool,
}

impl HarnessOptions {
  pub fn from_path(path: &Path) -> Result<Self, AnyError> {
    let text = std::fs::read_to_string(path)
      .with_context(|| format!("Unable to read {}", path.display()))?;
    Self::from_json(&text)
      .with_context(|| format!("Invalid {}", path.display()))
  }

  pub fn from_json(text: &str) -> Result<Self, AnyError> {
    Ok(serde_json::from_str(text)?)
  }

  /// Host name under which the add-on's resources are mapped.
  pub fn domain(&self) -> String {
    domain_for(&self.jetpack_id)
  }

  pub fn prefix_uri(&self) -> String {
    format!("resource://{}/", self.domain())
  }

  pub fn version(&self) -> &str {
    self
      .metadata
      .get(&self.name)
      .map(|metadata| metadata.version.as_str())
      .unwrap_or_default()
  }

  /// The loader path table: `./` is the add-on's own `lib`, every package
  /// gets its `lib` and `tests`, and the remaining ids fall through to the
  /// platform modules.
  pub fn paths(&self) -> IndexMap<String, String> {
    let prefix = self.prefix_uri();
    let mut paths = IndexMap::new();
    paths.insert("./".to_string(), format!("{prefix}{}/lib/", self.name));
    paths.insert(
      "toolkit/".to_string(),
      "resource://gre/modules/toolkit/".to_string(),
    );
    paths.insert(String::new(), "resources:///modules/".to_string());
    for name in self.metadata.keys() {
      paths.insert(format!("{name}/"), format!("{prefix}{name}/lib/"));
      paths.insert(format!("{name}/tests/"), format!("{prefix}{name}/tests/"));
    }
    paths
  }

  pub fn manifest_v2(&self) -> Manifest {
    let mut manifest = Manifest::new();
    for (path, entry) in &self.manifest {
      let requirements = entry
        .requirements
        .iter()
        .filter_map(|(alias, requirement)| {
          let path = requirement.path.as_deref()?;
          Some((alias.clone(), path2id(path)))
        })
        .collect();
      manifest.insert(path2id(path), ManifestEntry { requirements });
    }
    manifest
  }

  pub fn main_id(&self) -> String {
    path2id(&self.main_path)
  }

  /// Explicit entries first, then every module declaring `chrome`.
  pub fn privileged(&self) -> Vec<String> {
    let mut privileged = self.privileged.clone();
    for (path, entry) in &self.manifest {
      let id = path2id(path);
      if entry.requirements.contains_key(CHROME_MODULE)
        && !privileged.contains(&id)
      {
        privileged.push(id);
      }
    }
    privileged
  }
}

/// `addon/lib/util/main.js` -> `addon/util/main`
pub fn path2id(path: &str) -> String {
  let id = LIB_SEGMENT_RE.replace(path, "$1");
  JS_EXTENSION_RE.replace(&id, "").into_owned()
}

/// `jid1-abc@jetpack` -> `jid1-abc-at-jetpack`; brace-wrapped UUIDs lose
/// their braces.
pub fn domain_for(id: &str) -> String {
  let domain = id.to_lowercase().replace('@', "-at-").replace('.', "-dot-");
  UUID_ID_RE.replace(&domain, "$1").into_owned()
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  const OPTIONS: &str = r#"{
    "jetpackID": "jid1-Demo@jetpack",
    "name": "demo",
    "mainPath": "demo/lib/main.js",
    "loader": "addon-kit/lib/cuddlefish.js",
    "staticArgs": { "quiet": true },
    "metadata": {
      "demo": { "version": "1.2.0", "main": "main", "author": "someone" },
      "api-utils": { "version": "1.0" }
    },
    "manifest": {
      "demo/lib/main.js": {
        "requirements": {
          "./data": { "path": "demo/lib/data.js" },
          "chrome": {}
        }
      },
      "demo/lib/data.js": {}
    }
  }"#;

  #[test]
  fn ids_from_paths() {
    assert_eq!(path2id("demo/lib/main.js"), "demo/main");
    assert_eq!(path2id("api-utils/lib/sdk/timers.js"), "api-utils/sdk/timers");
    assert_eq!(path2id("demo/tests/test-main.js"), "demo/tests/test-main");
    assert_eq!(path2id("demo/data.json"), "demo/data.json");
  }

  #[test]
  fn domains_from_ids() {
    assert_eq!(domain_for("jid1-Demo@jetpack"), "jid1-demo-at-jetpack");
    assert_eq!(domain_for("addon@example.com"), "addon-at-example-dot-com");
    assert_eq!(
      domain_for("{6A0E5F3B-8D2C-4E1A-9B7F-0C1D2E3F4A5B}"),
      "6a0e5f3b-8d2c-4e1a-9b7f-0c1d2e3f4a5b"
    );
  }

  #[test]
  fn parse_and_convert() {
    let options = HarnessOptions::from_json(OPTIONS).unwrap();
    assert_eq!(options.version(), "1.2.0");
    assert_eq!(options.main_id(), "demo/main");
    assert_eq!(
      options.metadata["demo"].extra.get("author"),
      Some(&serde_json::json!("someone"))
    );
    assert_eq!(
      options.paths().into_iter().collect::<Vec<_>>(),
      vec![
        (
          "./".to_string(),
          "resource://jid1-demo-at-jetpack/demo/lib/".to_string()
        ),
        (
          "toolkit/".to_string(),
          "resource://gre/modules/toolkit/".to_string()
        ),
        ("".to_string(), "resources:///modules/".to_string()),
        (
          "demo/".to_string(),
          "resource://jid1-demo-at-jetpack/demo/lib/".to_string()
        ),
        (
          "demo/tests/".to_string(),
          "resource://jid1-demo-at-jetpack/demo/tests/".to_string()
        ),
        (
          "api-utils/".to_string(),
          "resource://jid1-demo-at-jetpack/api-utils/lib/".to_string()
        ),
        (
          "api-utils/tests/".to_string(),
          "resource://jid1-demo-at-jetpack/api-utils/tests/".to_string()
        ),
      ]
    );

    let manifest = options.manifest_v2();
    let main = manifest.get("demo/main").unwrap();
    assert_eq!(
      main.requirements.get("./data").map(String::as_str),
      Some("demo/data")
    );
    assert!(!main.requirements.contains_key("chrome"));
    assert!(manifest.get("demo/data").unwrap().requirements.is_empty());
    assert_eq!(options.privileged(), vec!["demo/main".to_string()]);
  }

  #[test]
  fn missing_file_names_the_path() {
    let err = HarnessOptions::from_path(Path::new("/nonexistent/harness.json"))
      .unwrap_err();
    assert!(
      err.to_string().contains("/nonexistent/harness.json"),
      "{err}"
    );
  }
}
