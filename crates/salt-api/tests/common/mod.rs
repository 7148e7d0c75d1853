#![allow(dead_code)]
use anyhow::Result;
use assert_cmd::Command;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::{Builder, TempDir};

/// Scratch config directory plus helpers to drive the `salt-api` binary.
#[derive(Debug)]
pub struct TestEnv {
  temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    let temp = Builder::new()
      .prefix("salt-api-test-")
      .tempdir()
      .expect("temp dir");
    Self { temp }
  }

  pub fn path(&self) -> &Path {
    self.temp.path()
  }

  pub fn config_dir(&self) -> PathBuf {
    self.path().join("conf")
  }

  pub fn master_path(&self) -> PathBuf {
    self.config_dir().join("master")
  }

  pub fn log_path(&self) -> PathBuf {
    self.path().join("salt-api.log")
  }

  pub fn pid_path(&self) -> PathBuf {
    self.path().join("salt-api.pid")
  }

  /// Config pointing logs and the pid file into the temp dir.
  pub fn base_config(&self) -> String {
    format!(
      "verify_env: true\nlog_file: {}\npidfile: {}\nlog_level_logfile: ~\n",
      self.log_path().display(),
      self.pid_path().display()
    )
  }

  pub fn write_master(&self, body: &str) -> Result<PathBuf> {
    fs::create_dir_all(self.config_dir())?;
    // Verification rejects world-writable dirs, so do not depend on the umask
    fs::set_permissions(self.config_dir(), fs::Permissions::from_mode(0o755))?;
    let path = self.master_path();
    fs::write(&path, body)?;
    Ok(path)
  }

  pub fn write_drop_in(&self, name: &str, body: &str) -> Result<PathBuf> {
    let dir = self.config_dir().join("master.d");
    fs::create_dir_all(&dir)?;
    let path = dir.join(name);
    fs::write(&path, body)?;
    Ok(path)
  }

  pub fn salt_api(&self) -> Result<Command> {
    let mut cmd = Command::cargo_bin("salt-api")?;
    cmd.current_dir(self.path());
    cmd.env_remove("SALT_MASTER_CONFIG");
    cmd.env_remove("RUST_LOG");
    cmd.arg("-c").arg(self.config_dir());
    Ok(cmd)
  }
}

pub fn read_pid(path: &Path) -> Result<u32> {
  let raw = fs::read_to_string(path)?;
  Ok(raw.trim().parse()?)
}

/// Poll until `path` holds a complete pid, e.g. one written by a detached process.
pub fn wait_for_pid(path: &Path, timeout: Duration) -> Result<u32> {
  let deadline = Instant::now() + timeout;
  loop {
    match read_pid(path) {
      Ok(pid) => return Ok(pid),
      Err(err) if Instant::now() >= deadline => {
        return Err(err.context(format!("no pid in {} after {timeout:?}", path.display())));
      }
      Err(_) => thread::sleep(Duration::from_millis(50)),
    }
  }
}
