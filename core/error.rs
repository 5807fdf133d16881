// Copyright 2018-2026 the Deno authors. MIT license.

use std::borrow::Cow;
use std::fmt;
use std::fmt::Display;
use std::fmt::Formatter;
use std::io;

use serde::Deserialize;
use serde::Serialize;

use crate::module_specifier::ModuleResolutionError;
use crate::module_specifier::ModuleSpecifier;
use crate::modules::ModuleLoaderError;

/// A generic wrapper that can encapsulate any concrete error type.
pub type AnyError = anyhow::Error;

/// An exception raised by module or content script code.
///
/// Bodies return these (wrapped in an [`AnyError`]) the way script code
/// throws; the loader annotates them with the module location at the
/// evaluation boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
  pub name: Cow<'static, str>,
  pub message: String,
  pub line_number: Option<u32>,
  pub column_number: Option<u32>,
}

impl Exception {
  pub fn new(
    name: impl Into<Cow<'static, str>>,
    message: impl Into<String>,
  ) -> Self {
    Self {
      name: name.into(),
      message: message.into(),
      line_number: None,
      column_number: None,
    }
  }

  pub fn at(mut self, line_number: u32, column_number: u32) -> Self {
    self.line_number = Some(line_number);
    self.column_number = Some(column_number);
    self
  }

  pub fn at_line(mut self, line_number: u32) -> Self {
    self.line_number = Some(line_number);
    self
  }

  /// Extracts an exception from an arbitrary error. Errors that were not
  /// raised as exceptions become a plain `Error` with the full context chain
  /// as message.
  pub fn from_error(error: &AnyError) -> Self {
    match error.downcast_ref::<Exception>() {
      Some(exception) => exception.clone(),
      None => match error.downcast_ref::<serde_json::Error>() {
        Some(err) => Exception::new("SyntaxError", err.to_string())
          .at(err.line() as u32, err.column() as u32),
        None => Exception::new("Error", format!("{error:#}")),
      },
    }
  }
}

impl Display for Exception {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    write!(f, "{}: {}", self.name, self.message)
  }
}

impl std::error::Error for Exception {}

/// Creates a new exception with a caller-specified class name and message.
pub fn custom_error(
  class: &'static str,
  message: impl Into<Cow<'static, str>>,
) -> AnyError {
  Exception::new(class, message.into().into_owned()).into()
}

pub fn generic_error(message: impl Into<Cow<'static, str>>) -> AnyError {
  custom_error("Error", message)
}

pub fn type_error(message: impl Into<Cow<'static, str>>) -> AnyError {
  custom_error("TypeError", message)
}

pub fn range_error(message: impl Into<Cow<'static, str>>) -> AnyError {
  custom_error("RangeError", message)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
  pub function_name: Option<String>,
  pub file_name: Option<String>,
  pub line_number: Option<u32>,
  pub column_number: Option<u32>,
  /// Frames pushed by the loader itself. These never reach users.
  #[serde(skip)]
  pub is_internal: bool,
}

impl StackFrame {
  pub fn from_location(
    file_name: Option<String>,
    line_number: Option<u32>,
    column_number: Option<u32>,
  ) -> Self {
    Self {
      function_name: None,
      file_name,
      line_number,
      column_number,
      is_internal: false,
    }
  }

  pub(crate) fn internal(function_name: &str) -> Self {
    Self {
      function_name: Some(function_name.to_string()),
      file_name: Some("jetpack:loader".to_string()),
      line_number: None,
      column_number: None,
      is_internal: true,
    }
  }
}

impl Display for StackFrame {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    write!(
      f,
      "{}@{}:{}:{}",
      self.function_name.as_deref().unwrap_or(""),
      self.file_name.as_deref().unwrap_or("<unknown>"),
      self.line_number.unwrap_or(0),
      self.column_number.unwrap_or(0)
    )
  }
}

/// Renders frames as `name@file:line:column` lines.
pub fn serialize_stack(frames: &[StackFrame]) -> String {
  frames.iter().map(|frame| format!("{frame}\n")).collect()
}

/// An exception that escaped a module body, annotated with the location of
/// the failing module. `frames` start at the failing module and end at the
/// module that was passed to `require`/`main` by the original caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationError {
  pub specifier: ModuleSpecifier,
  pub name: String,
  pub message: String,
  pub line_number: Option<u32>,
  pub column_number: Option<u32>,
  pub frames: Vec<StackFrame>,
}

impl Display for EvaluationError {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    write!(f, "{}: {}", self.name, self.message)?;
    for frame in &self.frames {
      write!(
        f,
        "\n    at {}",
        frame.file_name.as_deref().unwrap_or("<unknown>")
      )?;
      if let Some(line_number) = frame.line_number {
        write!(f, ":{line_number}")?;
        if let Some(column_number) = frame.column_number {
          write!(f, ":{column_number}")?;
        }
      }
    }
    Ok(())
  }
}

/// An exception that escaped a content script or one of its listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentScriptError {
  pub filename: String,
  pub exception: Exception,
}

impl Display for ContentScriptError {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    write!(f, "{} ({}", self.exception, self.filename)?;
    if let Some(line_number) = self.exception.line_number {
      write!(f, ":{line_number}")?;
    }
    write!(f, ")")
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
  #[error("Module `{specifier}` is not found{}", requested_by(requester))]
  ModuleNotFound {
    specifier: String,
    requester: Option<String>,
  },
  #[error("{0}")]
  AccessDenied(String),
  #[error("{0}")]
  Evaluation(Box<EvaluationError>),
  #[error("{0}")]
  ContentScript(Box<ContentScriptError>),
  #[error("{0} has been destroyed")]
  DestroyedContextAccess(String),
  #[error(
    "The page is currently hidden and can no longer be used until it is visible again."
  )]
  Frozen,
  #[error(
    "Couldn't find the worker to receive this message. The script may not be initialized yet, or may already have been unloaded."
  )]
  NotReady,
  #[error("Invalid option: {0}")]
  InvalidOption(String),
}

fn requested_by(requester: &Option<String>) -> String {
  match requester {
    Some(requester) => format!(" (required from `{requester}`)"),
    None => String::new(),
  }
}

impl CoreError {
  pub fn destroyed(what: impl Display) -> Self {
    Self::DestroyedContextAccess(what.to_string())
  }

  pub fn is_destroyed(&self) -> bool {
    matches!(self, Self::DestroyedContextAccess(_))
  }
}

impl From<EvaluationError> for CoreError {
  fn from(err: EvaluationError) -> Self {
    Self::Evaluation(Box::new(err))
  }
}

impl From<ContentScriptError> for CoreError {
  fn from(err: ContentScriptError) -> Self {
    Self::ContentScript(Box::new(err))
  }
}

fn get_core_error_class(error: &CoreError) -> &'static str {
  match error {
    CoreError::ModuleNotFound { .. } => "NotFound",
    CoreError::AccessDenied(_) => "PermissionDenied",
    CoreError::Evaluation(_) => "EvaluationError",
    CoreError::ContentScript(_) => "ContentScriptError",
    CoreError::DestroyedContextAccess(_) => "BadResource",
    CoreError::Frozen => "Busy",
    CoreError::NotReady => "BadResource",
    CoreError::InvalidOption(_) => "TypeError",
  }
}

fn get_exception_class(exception: &Exception) -> &'static str {
  match exception.name.as_ref() {
    "TypeError" => "TypeError",
    "RangeError" => "RangeError",
    "SyntaxError" => "SyntaxError",
    "URIError" => "URIError",
    "ReferenceError" => "ReferenceError",
    _ => "Error",
  }
}

fn get_io_error_class(error: &io::Error) -> &'static str {
  use io::ErrorKind::*;
  match error.kind() {
    NotFound => "NotFound",
    PermissionDenied => "PermissionDenied",
    AlreadyExists => "AlreadyExists",
    InvalidInput => "TypeError",
    InvalidData => "InvalidData",
    TimedOut => "TimedOut",
    Interrupted => "Interrupted",
    UnexpectedEof => "UnexpectedEof",
    _ => "Error",
  }
}

/// Maps an error to the class name a script would observe.
pub fn get_error_class(error: &AnyError) -> &'static str {
  error
    .downcast_ref::<CoreError>()
    .map(get_core_error_class)
    .or_else(|| error.downcast_ref::<Exception>().map(get_exception_class))
    .or_else(|| {
      error
        .downcast_ref::<ModuleLoaderError>()
        .map(|err| match err {
          ModuleLoaderError::NotFound(_) => "NotFound",
          ModuleLoaderError::Unsupported(_) => "TypeError",
        })
    })
    .or_else(|| {
      error
        .downcast_ref::<ModuleResolutionError>()
        .map(|_| "URIError")
    })
    .or_else(|| {
      error
        .downcast_ref::<serde_json::Error>()
        .map(|err| match err.classify() {
          serde_json::error::Category::Io => "Error",
          serde_json::error::Category::Syntax
          | serde_json::error::Category::Eof => "SyntaxError",
          serde_json::error::Category::Data => "TypeError",
        })
    })
    .or_else(|| error.downcast_ref::<io::Error>().map(get_io_error_class))
    .unwrap_or("Error")
}
