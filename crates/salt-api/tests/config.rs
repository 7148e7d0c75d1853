mod common;

use std::fs;

use anyhow::Result;
use serde_yaml::Value;

use salt_api::config::{
  ConfigAssembler, ConfigError, ConfigSource, LOG_LEVEL_LOGFILE, LogLevel, Overrides,
};

use crate::common::TestEnv;

#[test]
fn defaults_fill_in_missing_keys() -> Result<()> {
  let env = TestEnv::new();
  let path = env.write_master("")?;

  let cfg = ConfigAssembler::new(&path, Overrides::default()).load()?;
  let opts = cfg.options()?;
  assert!(opts.verify_env);
  assert!(!opts.daemon);
  assert_eq!(opts.log_level, LogLevel::Info);
  assert_eq!(opts.log_file.as_deref(), Some("/var/log/salt/api"));
  assert_eq!(opts.pidfile, std::path::PathBuf::from("/var/run/salt-api.pid"));
  assert_eq!(opts.conf_file, path);
  Ok(())
}

#[test]
fn null_logfile_level_is_removed() -> Result<()> {
  let env = TestEnv::new();
  let path = env.write_master("log_level_logfile: ~\nlog_level: debug\n")?;

  let cfg = ConfigAssembler::new(&path, Overrides::default()).assemble()?;
  assert!(!cfg.contains_key(LOG_LEVEL_LOGFILE));
  let opts = cfg.options()?;
  assert_eq!(opts.log_level_logfile, None);
  assert_eq!(opts.logfile_level(), LogLevel::Debug);
  Ok(())
}

#[test]
fn explicit_logfile_level_is_kept() -> Result<()> {
  let env = TestEnv::new();
  let path = env.write_master("log_level: error\nlog_level_logfile: info\n")?;

  let cfg = ConfigAssembler::new(&path, Overrides::default()).load()?;
  assert_eq!(
    cfg.get(LOG_LEVEL_LOGFILE),
    Some(&Value::String("info".to_string()))
  );
  assert_eq!(cfg.options()?.logfile_level(), LogLevel::Info);
  Ok(())
}

#[test]
fn command_line_wins_over_file() -> Result<()> {
  let env = TestEnv::new();
  let path = env.write_master("log_level: error\ndaemon: false\npidfile: /tmp/from-file.pid\n")?;

  let overrides = Overrides {
    log_level: Some(LogLevel::Trace),
    log_level_logfile: Some(LogLevel::Warning),
    daemon: true,
    pidfile: Some("/tmp/from-cli.pid".into()),
    ..Overrides::default()
  };
  let opts = ConfigAssembler::new(&path, overrides).load()?.options()?;
  assert_eq!(opts.log_level, LogLevel::Trace);
  assert_eq!(opts.log_level_logfile, Some(LogLevel::Warning));
  assert!(opts.daemon);
  assert_eq!(opts.pidfile, std::path::PathBuf::from("/tmp/from-cli.pid"));
  Ok(())
}

#[test]
fn unset_flags_leave_file_values_alone() -> Result<()> {
  let env = TestEnv::new();
  let path = env.write_master("daemon: true\nlog_file: udp://localhost\n")?;

  let opts = ConfigAssembler::new(&path, Overrides::default())
    .load()?
    .options()?;
  assert!(opts.daemon);
  assert_eq!(opts.log_file.as_deref(), Some("udp://localhost"));
  Ok(())
}

#[test]
fn drop_in_files_merge_in_name_order() -> Result<()> {
  let env = TestEnv::new();
  let path = env.write_master("log_level: error\nrest_api:\n  port: 8000\n  host: 0.0.0.0\n")?;
  env.write_drop_in("20-late.conf", "log_level: debug\n")?;
  env.write_drop_in("10-early.conf", "log_level: warning\nrest_api:\n  port: 8443\n")?;
  env.write_drop_in("ignored.yaml", "log_level: quiet\n")?;

  let cfg = ConfigAssembler::new(&path, Overrides::default()).load()?;
  assert_eq!(cfg.options()?.log_level, LogLevel::Debug);

  let rest = cfg.get("rest_api").and_then(Value::as_mapping).expect("rest_api");
  assert_eq!(rest.get("port").and_then(Value::as_u64), Some(8443));
  assert_eq!(rest.get("host").and_then(Value::as_str), Some("0.0.0.0"));
  Ok(())
}

#[test]
fn missing_file_is_a_config_error() {
  let env = TestEnv::new();
  let err = ConfigAssembler::new(env.master_path(), Overrides::default())
    .load()
    .unwrap_err();
  assert!(matches!(err, ConfigError::Missing(_)));
}

#[test]
fn malformed_yaml_is_a_config_error() -> Result<()> {
  let env = TestEnv::new();
  let path = env.write_master("log_level: [info\n")?;
  let err = ConfigAssembler::new(&path, Overrides::default())
    .load()
    .unwrap_err();
  assert!(matches!(err, ConfigError::Yaml { .. }));
  Ok(())
}

#[test]
fn non_mapping_document_is_rejected() -> Result<()> {
  let env = TestEnv::new();
  let path = env.write_master("- just\n- a list\n")?;
  let err = ConfigAssembler::new(&path, Overrides::default())
    .load()
    .unwrap_err();
  assert!(matches!(err, ConfigError::NotMapping(_)));
  Ok(())
}

#[test]
fn wrong_types_are_rejected_at_load() -> Result<()> {
  let env = TestEnv::new();
  let path = env.write_master("verify_env: sometimes\n")?;
  let err = ConfigAssembler::new(&path, Overrides::default())
    .load()
    .unwrap_err();
  assert!(matches!(err, ConfigError::Invalid(_)));
  Ok(())
}

#[test]
fn directories_in_drop_in_dir_are_skipped() -> Result<()> {
  let env = TestEnv::new();
  let path = env.write_master("")?;
  // A directory named like a drop-in is skipped, not read
  fs::create_dir_all(env.config_dir().join("master.d").join("dir.conf"))?;
  ConfigAssembler::new(&path, Overrides::default()).load()?;
  Ok(())
}
