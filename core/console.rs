// Copyright 2018-2026 the Deno authors. MIT license.

use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::error::AnyError;
use crate::error::CoreError;
use crate::error::Exception;
use crate::value::Value;

pub const CONSOLE_LOG_TARGET: &str = "jetpack::console";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
  Log,
  Info,
  Warn,
  Error,
  Debug,
  Exception,
  Trace,
}

impl ConsoleLevel {
  pub fn as_str(self) -> &'static str {
    match self {
      ConsoleLevel::Log => "log",
      ConsoleLevel::Info => "info",
      ConsoleLevel::Warn => "warn",
      ConsoleLevel::Error => "error",
      ConsoleLevel::Debug => "debug",
      ConsoleLevel::Exception => "exception",
      ConsoleLevel::Trace => "trace",
    }
  }

  pub fn log_level(self) -> log::Level {
    match self {
      ConsoleLevel::Log | ConsoleLevel::Info => log::Level::Info,
      ConsoleLevel::Warn => log::Level::Warn,
      ConsoleLevel::Error | ConsoleLevel::Exception => log::Level::Error,
      ConsoleLevel::Debug => log::Level::Debug,
      ConsoleLevel::Trace => log::Level::Trace,
    }
  }
}

impl fmt::Display for ConsoleLevel {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ConsoleLevel {
  type Err = CoreError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(match s {
      "log" => ConsoleLevel::Log,
      "info" => ConsoleLevel::Info,
      "warn" => ConsoleLevel::Warn,
      "error" => ConsoleLevel::Error,
      "debug" => ConsoleLevel::Debug,
      "exception" => ConsoleLevel::Exception,
      "trace" => ConsoleLevel::Trace,
      _ => {
        return Err(CoreError::InvalidOption(format!(
          "unknown console level `{s}`"
        )));
      }
    })
  }
}

pub type ConsoleSink = Rc<dyn Fn(ConsoleLevel, &str)>;

/// The console capability. Messages are prefixed with the owner's name and
/// written to the `jetpack::console` log target unless a sink is installed.
#[derive(Clone)]
pub struct Console {
  name: Rc<str>,
  sink: Option<ConsoleSink>,
}

impl fmt::Debug for Console {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.debug_struct("Console").field("name", &self.name).finish()
  }
}

impl Console {
  pub fn new(name: &str) -> Self {
    Self {
      name: name.into(),
      sink: None,
    }
  }

  pub fn with_sink(name: &str, sink: ConsoleSink) -> Self {
    Self {
      name: name.into(),
      sink: Some(sink),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn format_args(args: &[Value]) -> String {
    args
      .iter()
      .map(|arg| arg.to_string())
      .collect::<Vec<_>>()
      .join(" ")
  }

  pub fn print(&self, level: ConsoleLevel, args: &[Value]) {
    self.write(level, &Self::format_args(args));
  }

  pub fn write(&self, level: ConsoleLevel, message: &str) {
    match &self.sink {
      Some(sink) => sink(level, message),
      None => log::log!(
        target: CONSOLE_LOG_TARGET,
        level.log_level(),
        "{}: {}",
        self.name,
        message
      ),
    }
  }

  pub fn log(&self, args: &[Value]) {
    self.print(ConsoleLevel::Log, args)
  }

  pub fn info(&self, args: &[Value]) {
    self.print(ConsoleLevel::Info, args)
  }

  pub fn warn(&self, args: &[Value]) {
    self.print(ConsoleLevel::Warn, args)
  }

  pub fn error(&self, args: &[Value]) {
    self.print(ConsoleLevel::Error, args)
  }

  pub fn debug(&self, args: &[Value]) {
    self.print(ConsoleLevel::Debug, args)
  }

  pub fn trace(&self, args: &[Value]) {
    self.print(ConsoleLevel::Trace, args)
  }

  /// Reports an uncaught error. Module evaluation errors keep their frames.
  pub fn exception(&self, err: &AnyError) {
    let message = match err.downcast_ref::<CoreError>() {
      Some(err) => err.to_string(),
      None => Exception::from_error(err).to_string(),
    };
    self.write(ConsoleLevel::Exception, &message);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::range_error;
  use std::cell::RefCell;

  #[test]
  fn sink_receives_formatted_messages() {
    let lines = Rc::new(RefCell::new(Vec::new()));
    let console = Console::with_sink("my-addon", {
      let lines = lines.clone();
      Rc::new(move |level: ConsoleLevel, message: &str| {
        lines.borrow_mut().push(format!("{level} {message}"))
      })
    });
    console.log(&["count".into(), 2.into(), vec![Value::Null].into()]);
    console.exception(&range_error("too far"));
    assert_eq!(
      *lines.borrow(),
      vec![
        "log count 2 [null]".to_string(),
        "exception RangeError: too far".to_string(),
      ]
    );
  }

  #[test]
  fn level_names() {
    assert_eq!("warn".parse::<ConsoleLevel>().unwrap(), ConsoleLevel::Warn);
    assert!("shout".parse::<ConsoleLevel>().is_err());
    assert_eq!(ConsoleLevel::Exception.log_level(), log::Level::Error);
  }
}
