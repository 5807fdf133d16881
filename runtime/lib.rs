// Copyright 2018-2026 the Deno authors. MIT license.

pub use jetpack_core;

pub mod bootstrap;
pub mod colors;
pub mod content_scope;
pub mod content_worker;
pub mod document;
pub mod fmt_errors;
pub mod harness;
pub mod logger;
pub mod tokio_util;

pub use bootstrap::AddonHost;
pub use bootstrap::BootstrapData;
pub use content_scope::ContentScope;
pub use content_scope::ContentScript;
pub use content_scope::content_script;
pub use content_worker::ContentScriptLoader;
pub use content_worker::ContentScriptWhen;
pub use content_worker::ContentWorker;
pub use content_worker::StaticContentScriptLoader;
pub use content_worker::WorkerOptions;
pub use content_worker::WorkerPort;
pub use content_worker::WorkerState;
pub use document::Document;
pub use document::ReadyState;
pub use harness::HarnessOptions;
