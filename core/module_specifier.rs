// Copyright 2018-2026 the Deno authors. MIT license.

use std::path::Path;

use url::ParseError;
use url::Url;

/// Resolved module specifier
pub type ModuleSpecifier = Url;

/// Error indicating the reason resolving a module specifier failed.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ModuleResolutionError {
  #[error("invalid URL: {0}")]
  InvalidUrl(ParseError),
  #[error("invalid base URL for relative import: {0}")]
  InvalidBaseUrl(ParseError),
  #[error("invalid path `{0}`")]
  InvalidPath(String),
  #[error("relative import path \"{0}\" not prefixed with / or ./ or ../")]
  ImportPrefixMissing(String),
}
use ModuleResolutionError::*;

/// Resolves a relative module id (`./x`, `../x`, `/x`) against the location
/// of the module that requested it.
pub fn resolve_import(
  specifier: &str,
  base: &ModuleSpecifier,
) -> Result<ModuleSpecifier, ModuleResolutionError> {
  match Url::parse(specifier) {
    Ok(url) => Ok(url),
    Err(ParseError::RelativeUrlWithoutBase)
      if !(specifier.starts_with('/')
        || specifier.starts_with("./")
        || specifier.starts_with("../")) =>
    {
      Err(ImportPrefixMissing(specifier.to_string()))
    }
    Err(ParseError::RelativeUrlWithoutBase) => {
      base.join(specifier).map_err(InvalidUrl)
    }
    // If parsing the specifier as a URL failed for a different reason than
    // it being relative, always return the original error.
    Err(err) => Err(InvalidUrl(err)),
  }
}

/// Turns a location from a path table or harness file into a URL. Absolute
/// filesystem paths become `file:` URLs, a trailing separator is kept so the
/// location can serve as a base.
pub fn resolve_location(
  location: &str,
) -> Result<ModuleSpecifier, ModuleResolutionError> {
  match Url::parse(location) {
    Ok(url) => Ok(url),
    Err(ParseError::RelativeUrlWithoutBase) => {
      let path = Path::new(location);
      let url = if location.ends_with('/') {
        Url::from_directory_path(path)
      } else {
        Url::from_file_path(path)
      };
      url.map_err(|_| InvalidPath(location.to_string()))
    }
    Err(err) => Err(InvalidUrl(err)),
  }
}

/// The directory a module lives in, with a trailing slash.
pub fn parent_location(specifier: &ModuleSpecifier) -> ModuleSpecifier {
  if specifier.path().ends_with('/') {
    return specifier.clone();
  }
  specifier.join("./").unwrap_or_else(|_| specifier.clone())
}
