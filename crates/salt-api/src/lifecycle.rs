//! Startup sequencing.
//!
//! ```text
//! assemble config -> verify env (optional) -> logging -> daemonize (optional)
//!   -> pid file -> service client run()
//! ```
//!
//! Every step is fatal on failure: nothing is running yet, so there is
//! nothing to keep alive.

use std::path::PathBuf;

use anyhow::{Context, Result};
use log::{debug, info};

use crate::client::{ApiClient, ClientFactory, ServiceClient};
use crate::config::{AppProfile, BootOptions, ConfigSource, Configuration};
use crate::utils::daemon::{DaemonController, Detach};
use crate::utils::log::{InitLogging, LogInitializer};
use crate::utils::verify::{
  EnvVerifier, Verify, VerifyError, current_user, dirname, is_network_destination,
};

pub struct Bootstrap {
  profile: AppProfile,
  source: Box<dyn ConfigSource>,
  verifier: Box<dyn Verify>,
  logging: Box<dyn InitLogging>,
  daemon: DaemonController,
  client: ClientFactory,
  user: Option<String>,
}

impl Bootstrap {
  /// Bootstrap with the real verifier, logging, double fork and [`ApiClient`].
  pub fn new(profile: AppProfile, source: impl ConfigSource + 'static) -> Self {
    Self {
      profile,
      source: Box::new(source),
      verifier: Box::new(EnvVerifier),
      logging: Box::new(LogInitializer::new(profile.name)),
      daemon: DaemonController::default(),
      client: Box::new(|cfg: Configuration| -> Box<dyn ServiceClient> {
        Box::new(ApiClient::new(cfg))
      }),
      user: None,
    }
  }

  #[must_use]
  pub fn with_verifier(mut self, verifier: impl Verify + 'static) -> Self {
    self.verifier = Box::new(verifier);
    self
  }

  #[must_use]
  pub fn with_logging(mut self, logging: impl InitLogging + 'static) -> Self {
    self.logging = Box::new(logging);
    self
  }

  #[must_use]
  pub fn with_detacher(mut self, detacher: impl Detach + 'static) -> Self {
    self.daemon = DaemonController::new(Box::new(detacher));
    self
  }

  #[must_use]
  pub fn with_client<F>(mut self, factory: F) -> Self
  where
    F: FnOnce(Configuration) -> Box<dyn ServiceClient> + 'static,
  {
    self.client = Box::new(factory);
    self
  }

  /// Verify ownership against `user` instead of the invoking user.
  #[must_use]
  pub fn with_user(mut self, user: impl Into<String>) -> Self {
    self.user = Some(user.into());
    self
  }

  /// Run the startup sequence and hand over to the service client.
  ///
  /// # Errors
  /// A failed environment check surfaces as a [`VerifyError`] (see
  /// [`crate::exit_code`]); every other failure is reported as is.
  pub fn run(self) -> Result<()> {
    let Bootstrap {
      profile,
      source,
      verifier,
      logging,
      mut daemon,
      client,
      user,
    } = self;

    let config = source.assemble()?;
    let opts = config.options()?;

    if opts.verify_env {
      let user = user.unwrap_or_else(current_user);
      verify(verifier.as_ref(), &opts, &user)?;
    }

    logging.setup(&opts).context("failed to set up logging")?;
    info!("Starting {} {}", profile.name, profile.version);
    debug!("Loaded configuration from {}", opts.conf_file.display());

    daemon.daemonize_if_required(opts.daemon)?;
    let identity = daemon.set_pidfile(&opts.pidfile)?;
    debug!("Running as pid {} ({:?})", identity.pid, identity.state);

    let mut service = client(config);
    service.run()
  }
}

fn verify(verifier: &dyn Verify, opts: &BootOptions, user: &str) -> Result<(), VerifyError> {
  verifier.verify_env(&[dirname(&opts.conf_file)], user)?;
  if let Some(dest) = opts.log_file.as_deref()
    && !dest.is_empty()
    && !is_network_destination(dest)
  {
    verifier.verify_files(&[PathBuf::from(dest)], user)?;
  }
  Ok(())
}
