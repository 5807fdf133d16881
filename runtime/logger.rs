// Copyright 2018-2026 the Deno authors. MIT license.

use std::io::Write;

use jetpack_core::console::CONSOLE_LOG_TARGET;

use crate::colors;

/// `JETPACK_LOG` overrides `default_level`; `JETPACK_LOG_STYLE` controls
/// colors. Add-on console output passes at every level.
pub fn builder(default_level: log::Level) -> env_logger::Builder {
  let mut builder = env_logger::Builder::from_env(
    env_logger::Env::new()
      .filter_or("JETPACK_LOG", default_level.to_level_filter().to_string())
      .write_style("JETPACK_LOG_STYLE"),
  );
  builder
    .filter_module(CONSOLE_LOG_TARGET, log::LevelFilter::Trace)
    .format(|buf, record| {
      if record.target() == CONSOLE_LOG_TARGET {
        return writeln!(
          buf,
          "{} {}",
          colors::gray(record.level().as_str().to_lowercase()),
          record.args()
        );
      }
      if record.level() <= log::Level::Info {
        return writeln!(buf, "{}", record.args());
      }
      let mut target = record.target().to_string();
      if let Some(line) = record.line() {
        target = format!("{target}:{line}");
      }
      writeln!(buf, "{} RS - {} - {}", record.level(), target, record.args())
    });
  builder
}

/// Installs the process logger. Only the first call has any effect.
pub fn init(maybe_level: Option<log::Level>) {
  let _ = builder(maybe_level.unwrap_or(log::Level::Info)).try_init();
}

#[cfg(test)]
mod tests {
  use super::*;
  use log::Log;

  fn metadata(target: &str, level: log::Level) -> log::Metadata<'_> {
    log::Metadata::builder().target(target).level(level).build()
  }

  #[test]
  fn console_output_ignores_the_default_level() {
    // SAFETY: no other test reads or writes this variable.
    unsafe { std::env::remove_var("JETPACK_LOG") };
    let logger = builder(log::Level::Warn).build();
    assert!(logger.enabled(&metadata(CONSOLE_LOG_TARGET, log::Level::Debug)));
    assert!(logger.enabled(&metadata("jetpack_core::loader", log::Level::Warn)));
    assert!(
      !logger.enabled(&metadata("jetpack_core::loader", log::Level::Info))
    );
  }
}
