// Copyright 2018-2026 the Deno authors. MIT license.

//! Terminal styling for error reports and log lines. `NO_COLOR` turns all of
//! it off.

use std::borrow::Cow;
use std::fmt;
use std::io;
use std::io::Write as _;

use once_cell::sync::Lazy;
use regex::Regex;
use termcolor::Ansi;
use termcolor::Color;
use termcolor::ColorSpec;
use termcolor::WriteColor;

static NO_COLOR: Lazy<bool> =
  Lazy::new(|| std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty()));

// https://github.com/chalk/ansi-regex/blob/02fa893d619d3da85411acc8fd4e2eea0e95a9d9/index.js
static ANSI_ESCAPE_RE: Lazy<Regex> = Lazy::new(|| {
  Regex::new(
    r"[\u001b\u009b][\[\]()#;?]*(?:(?:(?:[a-zA-Z\d]*(?:;[a-zA-Z\d]*)*)?\u0007)|(?:(?:\d{1,4}(?:;\d{0,4})*)?[\dA-PR-TZcf-ntqry=><~]))",
  )
  .unwrap()
});

pub fn use_color() -> bool {
  !*NO_COLOR
}

pub fn strip_ansi_codes(s: &str) -> Cow<'_, str> {
  ANSI_ESCAPE_RE.replace_all(s, "")
}

/// Lets termcolor's `Ansi` writer target a `fmt::Formatter`.
struct FormatterSink<'a, 'b>(&'a mut fmt::Formatter<'b>);

impl io::Write for FormatterSink<'_, '_> {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    let text = std::str::from_utf8(buf).map_err(io::Error::other)?;
    self
      .0
      .write_str(text)
      .map_err(|_| io::Error::other("formatter rejected write"))?;
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

/// `inner` rendered with `spec` when color is enabled, plain otherwise.
pub struct Styled<T> {
  spec: ColorSpec,
  inner: T,
}

impl<T: fmt::Display> fmt::Display for Styled<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if !use_color() {
      return self.inner.fmt(f);
    }
    let text = self.inner.to_string();
    let mut out = Ansi::new(FormatterSink(f));
    out.set_color(&self.spec).map_err(|_| fmt::Error)?;
    out.write_all(text.as_bytes()).map_err(|_| fmt::Error)?;
    out.reset().map_err(|_| fmt::Error)
  }
}

fn styled<T>(
  inner: T,
  fg: Option<Color>,
  bold: bool,
  italic: bool,
) -> Styled<T> {
  let mut spec = ColorSpec::new();
  spec.set_fg(fg).set_bold(bold).set_italic(italic);
  Styled { spec, inner }
}

pub fn red_bold<T: fmt::Display>(s: T) -> Styled<T> {
  styled(s, Some(Color::Red), true, false)
}

pub fn italic_bold<T: fmt::Display>(s: T) -> Styled<T> {
  styled(s, None, true, true)
}

pub fn yellow<T: fmt::Display>(s: T) -> Styled<T> {
  styled(s, Some(Color::Yellow), false, false)
}

pub fn cyan<T: fmt::Display>(s: T) -> Styled<T> {
  styled(s, Some(Color::Cyan), false, false)
}

pub fn gray<T: fmt::Display>(s: T) -> Styled<T> {
  styled(s, Some(Color::Ansi256(245)), false, false)
}
