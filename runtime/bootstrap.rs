// Copyright 2018-2026 the Deno authors. MIT license.

//! Add-on lifecycle hooks called by the host application.
//!
//! `startup` reads the add-on's harness options, builds a [`Loader`] for it
//! and runs the main module. `shutdown` unloads that loader; its contexts are
//! destroyed once the grace delay has passed, or right away when the add-on
//! starts up again before that.

use std::cell::RefCell;
use std::path::Path;
use std::path::PathBuf;
use std::rc::Rc;

use jetpack_core::AnyError;
use jetpack_core::CoreError;
use jetpack_core::EventLoop;
use jetpack_core::FsModuleLoader;
use jetpack_core::Loader;
use jetpack_core::LoaderOptions;
use jetpack_core::LoaderPhase;
use jetpack_core::ModuleLoader;
use jetpack_core::ModuleLoaderError;
use jetpack_core::ModuleSource;
use jetpack_core::ModuleSpecifier;
use jetpack_core::Object;
use jetpack_core::Reason;
use jetpack_core::StaticModuleLoader;
use jetpack_core::Value;
use serde_json::json;

use crate::fmt_errors::format_error;
use crate::harness::HARNESS_OPTIONS_FILE;
use crate::harness::HarnessOptions;

/// Id under which the main module finds the options it was started with.
pub const LOADER_OPTIONS_MODULE: &str = "@loader/options";

/// What the host knows about the add-on being started or stopped.
#[derive(Clone, Debug)]
pub struct BootstrapData {
  pub id: String,
  pub version: String,
  pub install_path: PathBuf,
}

fn reason_for(code: u32) -> Result<Reason, CoreError> {
  Reason::from_code(code).ok_or_else(|| {
    CoreError::InvalidOption(format!("Unknown lifecycle reason code: {code}"))
  })
}

fn directory_url(path: &Path) -> Result<ModuleSpecifier, CoreError> {
  ModuleSpecifier::from_directory_path(path).map_err(|_| {
    CoreError::InvalidOption(format!(
      "Install path must be absolute: {}",
      path.display()
    ))
  })
}

/// Serves `resource://<domain>/...` from the add-on's `resources` directory.
/// Native modules registered by the embedder take precedence over files.
struct ResourceModuleLoader {
  domain: String,
  resources: ModuleSpecifier,
  natives: Rc<StaticModuleLoader>,
  files: FsModuleLoader,
}

impl ResourceModuleLoader {
  fn translate(&self, specifier: &ModuleSpecifier) -> Option<ModuleSpecifier> {
    if specifier.scheme() != "resource"
      || specifier.host_str() != Some(self.domain.as_str())
    {
      return None;
    }
    self
      .resources
      .join(specifier.path().trim_start_matches('/'))
      .ok()
  }
}

impl ModuleLoader for ResourceModuleLoader {
  fn load(
    &self,
    specifier: &ModuleSpecifier,
  ) -> Result<ModuleSource, ModuleLoaderError> {
    if self.natives.exists(specifier) {
      return self.natives.load(specifier);
    }
    let Some(file) = self.translate(specifier) else {
      return Err(ModuleLoaderError::NotFound(specifier.clone()));
    };
    let source = self
      .files
      .load(&file)
      .map_err(|_| ModuleLoaderError::NotFound(specifier.clone()))?;
    Ok(ModuleSource::new(source.code, specifier))
  }

  fn exists(&self, specifier: &ModuleSpecifier) -> bool {
    self.natives.exists(specifier)
      || self
        .translate(specifier)
        .is_some_and(|file| self.files.exists(&file))
  }
}

/// Hosts one add-on across its install/startup/shutdown/uninstall calls.
pub struct AddonHost {
  event_loop: EventLoop,
  natives: Rc<StaticModuleLoader>,
  chrome: Option<Value>,
  loader: RefCell<Option<Loader>>,
  retired: RefCell<Vec<Loader>>,
}

impl AddonHost {
  pub fn new(event_loop: EventLoop, natives: StaticModuleLoader) -> Self {
    Self {
      event_loop,
      natives: Rc::new(natives),
      chrome: None,
      loader: RefCell::new(None),
      retired: RefCell::new(Vec::new()),
    }
  }

  /// The value privileged modules receive from `require("chrome")`.
  pub fn with_chrome(mut self, chrome: Value) -> Self {
    self.chrome = Some(chrome);
    self
  }

  pub fn event_loop(&self) -> &EventLoop {
    &self.event_loop
  }

  /// The loader of the running add-on, if it is started.
  pub fn loader(&self) -> Option<Loader> {
    self.loader.borrow().clone()
  }

  pub fn install(
    &self,
    data: &BootstrapData,
    reason_code: u32,
  ) -> Result<(), AnyError> {
    let reason = reason_for(reason_code)?;
    log::debug!("install `{}` {} ({reason})", data.id, data.version);
    Ok(())
  }

  pub fn uninstall(
    &self,
    data: &BootstrapData,
    reason_code: u32,
  ) -> Result<(), AnyError> {
    let reason = reason_for(reason_code)?;
    log::debug!("uninstall `{}` {} ({reason})", data.id, data.version);
    Ok(())
  }

  pub fn startup(
    &self,
    data: &BootstrapData,
    reason_code: u32,
  ) -> Result<(), AnyError> {
    crate::logger::init(None);
    let reason = reason_for(reason_code)?;
    log::debug!("startup `{}` {} ({reason})", data.id, data.version);
    self.destroy_retired();
    let previous = self.loader.borrow_mut().take();
    if let Some(previous) = previous {
      previous.unload(reason);
      previous.destroy();
    }

    let result = self.start(data, reason);
    if let Err(err) = &result {
      log::error!("Bootstrap error: {}", format_error(err));
    }
    result
  }

  fn start(&self, data: &BootstrapData, reason: Reason) -> Result<(), AnyError> {
    let options =
      HarnessOptions::from_path(&data.install_path.join(HARNESS_OPTIONS_FILE))?;
    let root_uri = directory_url(&data.install_path)?;
    let prefix_uri = options.prefix_uri();

    let mut loader_options = LoaderOptions {
      paths: options.paths(),
      manifest: options.manifest_v2(),
      id: options.jetpack_id.clone(),
      name: options.name.clone(),
      version: options.version().to_string(),
      root_uri: Some(root_uri.to_string()),
      privileged: options.privileged(),
      strict_requirements: options.strict_requirements,
      ..Default::default()
    };
    loader_options.modules.insert(
      LOADER_OPTIONS_MODULE.to_string(),
      Object::snapshot(&json!({
        "id": options.jetpack_id,
        "name": options.name,
        "version": options.version(),
        "metadata": options.metadata.get(&options.name),
        "loadReason": reason.as_str(),
        "prefixURI": prefix_uri,
        "rootURI": root_uri.as_str(),
        "staticArgs": options.static_args,
      })),
    );

    let source = ResourceModuleLoader {
      domain: options.domain(),
      resources: directory_url(&data.install_path.join("resources"))?,
      natives: self.natives.clone(),
      files: FsModuleLoader::default(),
    };
    let loader =
      Loader::new(loader_options, Rc::new(source), self.event_loop.clone())?;
    if let Some(chrome) = &self.chrome {
      loader.set_chrome(chrome.clone());
    }
    *self.loader.borrow_mut() = Some(loader.clone());

    let exports = loader.main(&options.main_id())?;
    if let Some(on_unload) = exports.get("onUnload").as_function().cloned() {
      loader.unloader().when(Rc::new(move |reason: Reason| {
        on_unload.call(&[reason.as_str().into()])?;
        Ok(())
      }));
    }
    if let Some(main) = exports.get("main").as_function() {
      let main_options = Object::from_entries([
        ("loadReason", Value::from(reason.as_str())),
        ("staticArgs", Value::from_json(&options.static_args)),
      ]);
      main.call(&[main_options.into()])?;
    }
    Ok(())
  }

  /// Logical unload of the running add-on. Its contexts stay alive until
  /// the loader's grace delay has passed.
  pub fn shutdown(
    &self,
    data: &BootstrapData,
    reason_code: u32,
  ) -> Result<(), AnyError> {
    let reason = reason_for(reason_code)?;
    log::debug!("shutdown `{}` {} ({reason})", data.id, data.version);
    let loader = self.loader.borrow_mut().take();
    if let Some(loader) = loader {
      loader.unload(reason);
      self.retired.borrow_mut().push(loader);
    }
    Ok(())
  }

  fn destroy_retired(&self) {
    let retired = std::mem::take(&mut *self.retired.borrow_mut());
    for loader in retired {
      if loader.phase() != LoaderPhase::Destroyed {
        loader.destroy();
      }
    }
  }

  /// Runs timers and message deliveries until nothing is left to do.
  pub async fn run(&self) {
    self.event_loop.run_event_loop().await;
  }

  /// [`AddonHost::run`] on a fresh current-thread runtime.
  pub fn run_blocking(&self) -> std::io::Result<()> {
    crate::tokio_util::run_local(self.run())
  }
}
