// Copyright 2018-2026 the Deno authors. MIT license.
pub mod console;
mod context;
pub mod error;
mod event;
mod event_loop;
mod loader;
mod module_specifier;
mod modules;
pub mod pipe;
mod resolver;
mod timers;
pub mod unload;
mod value;

// Re-exports
pub use anyhow;
pub use indexmap;
pub use serde;
pub use serde_json;
pub use url;

pub use crate::console::Console;
pub use crate::console::ConsoleLevel;
pub use crate::console::ConsoleSink;
pub use crate::context::Capabilities;
pub use crate::context::ContextFactory;
pub use crate::context::ContextOptions;
pub use crate::context::ExecutionContext;
pub use crate::error::AnyError;
pub use crate::error::ContentScriptError;
pub use crate::error::CoreError;
pub use crate::error::EvaluationError;
pub use crate::error::Exception;
pub use crate::error::StackFrame;
pub use crate::error::get_error_class;
pub use crate::event::EventEmitter;
pub use crate::event::EventListener;
pub use crate::event::ListenerErrorHandler;
pub use crate::event_loop::Clock;
pub use crate::event_loop::EventLoop;
pub use crate::event_loop::ManualClock;
pub use crate::event_loop::SystemClock;
pub use crate::event_loop::TimerId;
pub use crate::loader::CHROME_MODULE;
pub use crate::loader::DEFAULT_UNLOAD_GRACE_MS;
pub use crate::loader::Loader;
pub use crate::loader::LoaderOptions;
pub use crate::loader::LoaderPhase;
pub use crate::loader::ModuleScope;
pub use crate::loader::main;
pub use crate::module_specifier::ModuleResolutionError;
pub use crate::module_specifier::ModuleSpecifier;
pub use crate::module_specifier::parent_location;
pub use crate::module_specifier::resolve_import;
pub use crate::module_specifier::resolve_location;
pub use crate::modules::Deps;
pub use crate::modules::ExportsCell;
pub use crate::modules::FsModuleLoader;
pub use crate::modules::ModuleBody;
pub use crate::modules::ModuleCode;
pub use crate::modules::ModuleDescriptor;
pub use crate::modules::ModuleId;
pub use crate::modules::ModuleLoader;
pub use crate::modules::ModuleLoaderError;
pub use crate::modules::ModuleMap;
pub use crate::modules::ModuleSource;
pub use crate::modules::ModuleState;
pub use crate::modules::NoopModuleLoader;
pub use crate::modules::StaticModuleLoader;
pub use crate::pipe::PipeEnd;
pub use crate::pipe::create_pipe;
pub use crate::resolver::Manifest;
pub use crate::resolver::ManifestEntry;
pub use crate::resolver::PathTable;
pub use crate::resolver::Requester;
pub use crate::resolver::Resolution;
pub use crate::resolver::ResolveError;
pub use crate::resolver::Resolver;
pub use crate::timers::TimerErrorHandler;
pub use crate::timers::Timers;
pub use crate::unload::Disposable;
pub use crate::unload::Ensured;
pub use crate::unload::Reason;
pub use crate::unload::UnloadCallback;
pub use crate::unload::Unloader;
pub use crate::value::Function;
pub use crate::value::HostObject;
pub use crate::value::Object;
pub use crate::value::Value;
