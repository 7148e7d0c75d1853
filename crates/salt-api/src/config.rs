use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::LevelFilter;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use thiserror::Error;

/// Directory searched for the master config when `-c` is not given.
pub const DEFAULT_CONFIG_DIR: &str = "/etc/salt";

/// Environment variable naming the config file when `-c` is not given.
pub const CONFIG_ENV_VAR: &str = "SALT_MASTER_CONFIG";

/// Key that is dropped after assembly when it is null, so the logfile level
/// falls back to the console level.
pub const LOG_LEVEL_LOGFILE: &str = "log_level_logfile";

// Embed built-in defaults
const DEFAULT_YAML: &str =
  include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/defaults/master.yaml"));

/// Static facts about the program being bootstrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppProfile {
  pub name: &'static str,
  pub version: &'static str,
  /// File name looked up inside the config directory.
  pub config_filename: &'static str,
  pub default_log_level: LogLevel,
}

impl Default for AppProfile {
  fn default() -> Self {
    Self {
      name: "salt-api",
      version: env!("CARGO_PKG_VERSION"),
      config_filename: "master",
      default_log_level: LogLevel::Info,
    }
  }
}

/// Log levels understood in config files and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  All,
  Garbage,
  Trace,
  Debug,
  Profile,
  #[default]
  Info,
  #[serde(alias = "warn")]
  #[value(alias = "warn")]
  Warning,
  Error,
  Critical,
  Quiet,
}

impl LogLevel {
  #[must_use]
  pub fn as_str(self) -> &'static str {
    match self {
      LogLevel::All => "all",
      LogLevel::Garbage => "garbage",
      LogLevel::Trace => "trace",
      LogLevel::Debug => "debug",
      LogLevel::Profile => "profile",
      LogLevel::Info => "info",
      LogLevel::Warning => "warning",
      LogLevel::Error => "error",
      LogLevel::Critical => "critical",
      LogLevel::Quiet => "quiet",
    }
  }

  /// Map onto the `log` facade's filters.
  #[must_use]
  pub fn filter(self) -> LevelFilter {
    match self {
      LogLevel::All | LogLevel::Garbage | LogLevel::Trace => LevelFilter::Trace,
      LogLevel::Debug | LogLevel::Profile => LevelFilter::Debug,
      LogLevel::Info => LevelFilter::Info,
      LogLevel::Warning => LevelFilter::Warn,
      LogLevel::Error | LogLevel::Critical => LevelFilter::Error,
      LogLevel::Quiet => LevelFilter::Off,
    }
  }
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("config file not found: {}", .0.display())]
  Missing(PathBuf),
  #[error("failed to read {}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("invalid YAML in {}", path.display())]
  Yaml {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },
  #[error("{} must contain a mapping of options", .0.display())]
  NotMapping(PathBuf),
  #[error("invalid configuration")]
  Invalid(#[source] serde_yaml::Error),
}

/// Merged option mapping handed to every later stage and finally to the
/// service client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configuration {
  opts: Mapping,
}

impl Configuration {
  #[must_use]
  pub fn from_mapping(opts: Mapping) -> Self {
    Self { opts }
  }

  #[must_use]
  pub fn get(&self, key: &str) -> Option<&Value> {
    self.opts.get(key)
  }

  #[must_use]
  pub fn contains_key(&self, key: &str) -> bool {
    self.opts.contains_key(key)
  }

  #[must_use]
  pub fn as_mapping(&self) -> &Mapping {
    &self.opts
  }

  /// Drop `log_level_logfile` when it is null.
  ///
  /// Downstream logging distinguishes an absent key (use the console level)
  /// from an explicit level, so a null must never survive assembly.
  pub fn normalize(&mut self) {
    if self.opts.get(LOG_LEVEL_LOGFILE).is_some_and(Value::is_null) {
      self.opts.remove(LOG_LEVEL_LOGFILE);
    }
  }

  /// Typed view over the options the bootstrap itself consumes.
  ///
  /// # Errors
  /// Returns [`ConfigError::Invalid`] when a required key is missing or has
  /// the wrong type.
  pub fn options(&self) -> Result<BootOptions, ConfigError> {
    serde_yaml::from_value(Value::Mapping(self.opts.clone())).map_err(ConfigError::Invalid)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BootOptions {
  pub conf_file: PathBuf,
  pub verify_env: bool,
  /// File path or `tcp://`, `udp://`, `file://` syslog destination.
  #[serde(default)]
  pub log_file: Option<String>,
  #[serde(default)]
  pub log_level: LogLevel,
  #[serde(default)]
  pub log_level_logfile: Option<LogLevel>,
  #[serde(default)]
  pub daemon: bool,
  pub pidfile: PathBuf,
}

impl BootOptions {
  /// Level for the log destination; falls back to the console level.
  #[must_use]
  pub fn logfile_level(&self) -> LogLevel {
    self.log_level_logfile.unwrap_or(self.log_level)
  }
}

/// Command-line values that override the config file. `None`/`false` means
/// the flag was not given and the file value stays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
  pub log_level: Option<LogLevel>,
  pub log_file: Option<String>,
  pub log_level_logfile: Option<LogLevel>,
  pub daemon: bool,
  pub pidfile: Option<PathBuf>,
}

impl Overrides {
  fn into_mapping(self) -> Mapping {
    let mut map = Mapping::new();
    if let Some(level) = self.log_level {
      map.insert("log_level".into(), level.as_str().into());
    }
    if let Some(dest) = self.log_file {
      map.insert("log_file".into(), dest.into());
    }
    if let Some(level) = self.log_level_logfile {
      map.insert(LOG_LEVEL_LOGFILE.into(), level.as_str().into());
    }
    if self.daemon {
      map.insert("daemon".into(), true.into());
    }
    if let Some(path) = self.pidfile {
      map.insert("pidfile".into(), path.display().to_string().into());
    }
    map
  }
}

/// Anything that can produce the assembled configuration for a run.
pub trait ConfigSource {
  /// # Errors
  /// Returns an error when the configuration cannot be loaded.
  fn assemble(&self) -> Result<Configuration>;
}

/// A ready-made configuration; only normalized, never loaded.
impl ConfigSource for Configuration {
  fn assemble(&self) -> Result<Configuration> {
    let mut cfg = self.clone();
    cfg.normalize();
    Ok(cfg)
  }
}

/// Loads the master config file, its drop-ins and the command-line overrides.
#[derive(Debug, Clone)]
pub struct ConfigAssembler {
  path: PathBuf,
  overrides: Overrides,
}

impl ConfigAssembler {
  pub fn new(path: impl Into<PathBuf>, overrides: Overrides) -> Self {
    Self {
      path: path.into(),
      overrides,
    }
  }

  #[must_use]
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Merge defaults, config file, drop-ins and overrides, in that order.
  ///
  /// # Errors
  /// Returns a [`ConfigError`] when the config file is missing, unreadable or
  /// not a YAML mapping, or when the merged result lacks required keys.
  pub fn load(&self) -> Result<Configuration, ConfigError> {
    let mut merged: Value =
      serde_yaml::from_str(DEFAULT_YAML).map_err(ConfigError::Invalid)?;

    if !self.path.exists() {
      return Err(ConfigError::Missing(self.path.clone()));
    }
    merge_values(&mut merged, read_mapping(&self.path)?);

    for include in drop_in_files(&self.path)? {
      merge_values(&mut merged, read_mapping(&include)?);
    }

    merge_values(&mut merged, Value::Mapping(self.overrides.clone().into_mapping()));

    let Value::Mapping(mut opts) = merged else {
      return Err(ConfigError::NotMapping(self.path.clone()));
    };
    opts.insert(
      "conf_file".into(),
      self.path.display().to_string().into(),
    );

    let mut cfg = Configuration::from_mapping(opts);
    cfg.normalize();
    // Fail on type mismatches here rather than halfway through startup
    cfg.options()?;
    Ok(cfg)
  }
}

impl ConfigSource for ConfigAssembler {
  fn assemble(&self) -> Result<Configuration> {
    Ok(self.load()?)
  }
}

/// Resolve the master config path.
///
/// Precedence:
/// 1) `<config_dir>/<config_filename>` when a directory was given
/// 2) `SALT_MASTER_CONFIG` environment variable
/// 3) `/etc/salt/<config_filename>`
#[must_use]
pub fn resolve_config_path(config_dir: Option<&Path>, profile: &AppProfile) -> PathBuf {
  if let Some(dir) = config_dir {
    return dir.join(profile.config_filename);
  }
  if let Ok(path) = std::env::var(CONFIG_ENV_VAR)
    && !path.trim().is_empty()
  {
    return PathBuf::from(path);
  }
  Path::new(DEFAULT_CONFIG_DIR).join(profile.config_filename)
}

fn read_mapping(path: &Path) -> Result<Value, ConfigError> {
  let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
    path: path.to_path_buf(),
    source,
  })?;
  let val: Value = serde_yaml::from_str(&data).map_err(|source| ConfigError::Yaml {
    path: path.to_path_buf(),
    source,
  })?;
  match val {
    Value::Null => Ok(Value::Mapping(Mapping::new())),
    Value::Mapping(_) => Ok(val),
    _ => Err(ConfigError::NotMapping(path.to_path_buf())),
  }
}

/// `<dir>/<name>.d/*.conf`, sorted by file name.
fn drop_in_files(path: &Path) -> Result<Vec<PathBuf>, ConfigError> {
  let Some(name) = path.file_name() else {
    return Ok(Vec::new());
  };
  let mut dir_name = name.to_os_string();
  dir_name.push(".d");
  let dir = path.with_file_name(dir_name);
  if !dir.is_dir() {
    return Ok(Vec::new());
  }

  let entries = fs::read_dir(&dir).map_err(|source| ConfigError::Io {
    path: dir.clone(),
    source,
  })?;
  let mut files = Vec::new();
  for entry in entries {
    let entry = entry.map_err(|source| ConfigError::Io {
      path: dir.clone(),
      source,
    })?;
    let p = entry.path();
    if p.is_file() && p.extension().is_some_and(|ext| ext == "conf") {
      files.push(p);
    }
  }
  files.sort();
  Ok(files)
}

fn merge_values(base: &mut Value, overlay: Value) {
  match (base, overlay) {
    (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
      for (k, v) in overlay_map {
        match base_map.get_mut(&k) {
          Some(existing) => merge_values(existing, v),
          None => {
            base_map.insert(k, v);
          }
        }
      }
    }
    // Sequences and scalars: replace last-wins
    (base_slot, new_v) => *base_slot = new_v,
  }
}
