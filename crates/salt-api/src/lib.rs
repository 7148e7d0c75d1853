use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

pub mod client;
pub mod config;
pub mod lifecycle;
pub mod utils;

use crate::config::{AppProfile, ConfigAssembler, LogLevel, Overrides, resolve_config_path};
use crate::lifecycle::Bootstrap;
use crate::utils::verify::VerifyError;

/// salt-api - start the Salt API service.
#[derive(Debug, Parser)]
#[command(name = "salt-api", author, version, about, long_about = None)]
pub struct Cli {
  /// Pass in an alternative configuration directory.
  #[arg(short = 'c', long, value_name = "CONFIG_DIR")]
  pub config_dir: Option<PathBuf>,

  /// Console logging log level.
  #[arg(short = 'l', long, value_enum, value_name = "LOG_LEVEL")]
  pub log_level: Option<LogLevel>,

  /// Log file path, or a tcp://, udp:// or file:// syslog destination.
  #[arg(long, value_name = "LOG_FILE")]
  pub log_file: Option<String>,

  /// Logfile logging log level. Defaults to the console level.
  #[arg(long, value_enum, value_name = "LOG_LEVEL_LOGFILE")]
  pub log_file_level: Option<LogLevel>,

  /// Run the salt-api as a daemon.
  #[arg(short = 'd', long)]
  pub daemon: bool,

  /// Specify the location of the pidfile.
  #[arg(long, value_name = "PIDFILE")]
  pub pid_file: Option<PathBuf>,
}

impl Cli {
  /// Flags that take precedence over the config file.
  #[must_use]
  pub fn overrides(&self) -> Overrides {
    Overrides {
      log_level: self.log_level,
      log_file: self.log_file.clone(),
      log_level_logfile: self.log_file_level,
      daemon: self.daemon,
      pidfile: self.pid_file.clone(),
    }
  }
}

pub fn parse() -> Cli {
  Cli::parse()
}

pub fn run() -> Result<()> {
  let cli = parse();
  let profile = AppProfile::default();
  let path = resolve_config_path(cli.config_dir.as_deref(), &profile);
  let assembler = ConfigAssembler::new(path, cli.overrides());
  Bootstrap::new(profile, assembler).run()
}

/// Process exit status for a failed startup: the OS error number when the
/// environment check failed, 1 otherwise.
#[must_use]
pub fn exit_code(err: &anyhow::Error) -> i32 {
  err.downcast_ref::<VerifyError>().map_or(1, VerifyError::errno)
}
