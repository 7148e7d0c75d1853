use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, anyhow};
use log::{error, info, warn};

use crate::config::Configuration;

/// The long-running service started once bootstrap completes.
///
/// `run` is expected to block for the lifetime of the service; the bootstrap
/// does nothing after it returns.
pub trait ServiceClient {
  /// # Errors
  /// Returns an error when the service fails; it becomes the process' failure.
  fn run(&mut self) -> Result<()>;
}

/// Builds the service client from the final configuration.
pub type ClientFactory = Box<dyn FnOnce(Configuration) -> Box<dyn ServiceClient>>;

/// A network API module run by [`ApiClient`].
pub trait NetApi: Send + Sync {
  /// Also the top-level config key that enables the module.
  fn name(&self) -> &str;

  /// Serve until the module shuts down.
  ///
  /// # Errors
  /// Returns an error when the module cannot start or stops abnormally.
  fn start(&self, config: &Configuration) -> Result<()>;
}

/// Default service client: runs every enabled netapi module on its own thread.
pub struct ApiClient {
  config: Arc<Configuration>,
  modules: Vec<Arc<dyn NetApi>>,
}

impl ApiClient {
  #[must_use]
  pub fn new(config: Configuration) -> Self {
    Self {
      config: Arc::new(config),
      modules: Vec::new(),
    }
  }

  #[must_use]
  pub fn with_module(mut self, module: Arc<dyn NetApi>) -> Self {
    self.modules.push(module);
    self
  }

  /// Modules whose name appears as a key in the configuration.
  #[must_use]
  pub fn enabled_modules(&self) -> Vec<Arc<dyn NetApi>> {
    self
      .modules
      .iter()
      .filter(|m| self.config.contains_key(m.name()))
      .cloned()
      .collect()
  }
}

impl ServiceClient for ApiClient {
  fn run(&mut self) -> Result<()> {
    let enabled = self.enabled_modules();
    if enabled.is_empty() {
      warn!("No netapi modules are enabled; nothing to run");
      return Ok(());
    }

    let mut handles = Vec::with_capacity(enabled.len());
    for module in enabled {
      let name = module.name().to_string();
      let cfg = Arc::clone(&self.config);
      info!("Starting netapi module {name}");
      let handle = thread::Builder::new()
        .name(format!("netapi-{name}"))
        .spawn(move || module.start(&cfg))
        .with_context(|| format!("failed to spawn netapi module {name}"))?;
      handles.push((name, handle));
    }

    let mut first_err = None;
    for (name, handle) in handles {
      let outcome = handle
        .join()
        .map_err(|_| anyhow!("netapi module {name} panicked"))
        .and_then(|res| res.with_context(|| format!("netapi module {name} failed")));
      if let Err(err) = outcome {
        error!("{err:#}");
        first_err.get_or_insert(err);
      }
    }
    first_err.map_or(Ok(()), Err)
  }
}
