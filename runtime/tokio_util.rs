// Copyright 2018-2026 the Deno authors. MIT license.

pub fn create_basic_runtime() -> std::io::Result<tokio::runtime::Runtime> {
  tokio::runtime::Builder::new_current_thread()
    .enable_io()
    .enable_time()
    // Add-on code is single threaded; blocking work is limited to reading
    // add-on files.
    .max_blocking_threads(4)
    .build()
}

/// Drives `future` on a current-thread runtime inside a `LocalSet`, so it
/// may hold `Rc` state.
pub fn run_local<F, R>(future: F) -> std::io::Result<R>
where
  F: std::future::Future<Output = R>,
{
  let rt = create_basic_runtime()?;
  let local = tokio::task::LocalSet::new();
  Ok(local.block_on(&rt, future))
}

#[cfg(test)]
mod tests {
  use std::rc::Rc;

  #[test]
  fn local_futures_may_hold_rc() {
    let shared = Rc::new(5);
    let result = super::run_local(async move {
      tokio::task::yield_now().await;
      *shared + 1
    })
    .unwrap();
    assert_eq!(result, 6);
  }
}
