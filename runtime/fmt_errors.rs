// Copyright 2018-2026 the Deno authors. MIT license.
//! Terminal rendering of the errors that reach the embedder.
use crate::colors::cyan;
use crate::colors::italic_bold;
use crate::colors::red_bold;
use crate::colors::yellow;
use jetpack_core::AnyError;
use jetpack_core::ContentScriptError;
use jetpack_core::CoreError;
use jetpack_core::EvaluationError;
use jetpack_core::StackFrame;
use std::fmt::Write as _;

pub fn format_location(frame: &StackFrame) -> String {
  let mut result = String::new();
  match frame.file_name.as_deref() {
    Some(file_name) if !file_name.is_empty() => {
      result += &cyan(file_name).to_string();
    }
    _ => result += &cyan("<anonymous>").to_string(),
  }
  if let Some(line_number) = frame.line_number {
    let _ = write!(result, ":{}", yellow(line_number));
    if let Some(column_number) = frame.column_number {
      let _ = write!(result, ":{}", yellow(column_number));
    }
  }
  result
}

fn format_frame(frame: &StackFrame) -> String {
  match &frame.function_name {
    Some(function_name) => {
      format!("{} ({})", italic_bold(function_name), format_location(frame))
    }
    None => format_location(frame),
  }
}

/// Format an [`EvaluationError`] for terminal output.
pub fn format_evaluation_error(error: &EvaluationError) -> String {
  let mut s = format!("{}: {}", red_bold(&error.name), error.message);
  for frame in &error.frames {
    let _ = write!(s, "\n    at {}", format_frame(frame));
  }
  s
}

pub fn format_content_script_error(error: &ContentScriptError) -> String {
  let exception = &error.exception;
  let frame = StackFrame::from_location(
    Some(error.filename.clone()),
    exception.line_number,
    exception.column_number,
  );
  format!(
    "{}: {}\n    at {}",
    red_bold(&exception.name),
    exception.message,
    format_location(&frame)
  )
}

/// Renders any error, keeping the frames of script errors.
pub fn format_error(error: &AnyError) -> String {
  match error.downcast_ref::<CoreError>() {
    Some(CoreError::Evaluation(error)) => format_evaluation_error(error),
    Some(CoreError::ContentScript(error)) => format_content_script_error(error),
    _ => format!("{}: {error:#}", red_bold("error")),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::colors::strip_ansi_codes;
  use jetpack_core::Exception;
  use jetpack_core::ModuleSpecifier;

  #[test]
  fn evaluation_error_lists_frames() {
    let error = EvaluationError {
      specifier: ModuleSpecifier::parse("resource://addon/lib/b.js").unwrap(),
      name: "TypeError".to_string(),
      message: "nope".to_string(),
      line_number: Some(4),
      column_number: Some(2),
      frames: vec![
        StackFrame::from_location(
          Some("resource://addon/lib/b.js".to_string()),
          Some(4),
          Some(2),
        ),
        StackFrame::from_location(
          Some("resource://addon/lib/main.js".to_string()),
          None,
          None,
        ),
      ],
    };
    let formatted = format_error(&AnyError::from(CoreError::from(error)));
    assert_eq!(
      strip_ansi_codes(&formatted),
      "TypeError: nope\n    at resource://addon/lib/b.js:4:2\n    at resource://addon/lib/main.js"
    );
  }

  #[test]
  fn content_script_error_points_at_file() {
    let error = ContentScriptError {
      filename: "javascript:contentScript".to_string(),
      exception: Exception::new("Error", "boom").at_line(7),
    };
    assert_eq!(
      strip_ansi_codes(&format_content_script_error(&error)),
      "Error: boom\n    at javascript:contentScript:7"
    );
  }

  #[test]
  fn other_errors_keep_their_context() {
    let error = anyhow::anyhow!("disk on fire").context("reading options");
    assert_eq!(
      strip_ansi_codes(&format_error(&error)),
      "error: reading options: disk on fire"
    );
  }
}
