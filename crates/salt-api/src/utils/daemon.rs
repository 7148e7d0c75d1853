use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};
use nix::errno::Errno;
use nix::sys::stat::{Mode, umask};
use nix::unistd::{ForkResult, dup2_stderr, dup2_stdin, dup2_stdout, fork, setsid};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
  Foreground,
  /// Terminal once entered.
  Daemonized,
}

/// The process as it will keep running after startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessIdentity {
  pub pid: u32,
  pub state: DaemonState,
}

#[derive(Debug, Error)]
pub enum DaemonError {
  #[error("failed to fork")]
  Fork(#[source] Errno),
  #[error("failed to create a new session")]
  Setsid(#[source] Errno),
  #[error("failed to redirect standard streams")]
  Redirect(#[source] io::Error),
  #[error("failed to write pid file {}", path.display())]
  Pidfile {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Detaches the current process from its controlling terminal.
pub trait Detach {
  /// Returns in the detached process only; the original process exits.
  ///
  /// # Errors
  /// Returns an error when a fork, `setsid` or stream redirection fails.
  fn detach(&self) -> Result<(), DaemonError>;
}

/// Classic double fork: fork, `setsid`, fork again, then point the standard
/// streams at `/dev/null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DoubleFork;

impl Detach for DoubleFork {
  fn detach(&self) -> Result<(), DaemonError> {
    fork_and_exit_parent()?;
    setsid().map_err(DaemonError::Setsid)?;
    umask(Mode::from_bits_truncate(0o022));
    // Second fork: the session leader exits so the daemon can never
    // reacquire a controlling terminal
    fork_and_exit_parent()?;
    redirect_stdio()
  }
}

fn fork_and_exit_parent() -> Result<(), DaemonError> {
  // SAFETY: startup is still single-threaded; the child only continues the
  // bootstrap sequence.
  match unsafe { fork() }.map_err(DaemonError::Fork)? {
    ForkResult::Parent { .. } => std::process::exit(0),
    ForkResult::Child => Ok(()),
  }
}

fn redirect_stdio() -> Result<(), DaemonError> {
  let devnull = OpenOptions::new()
    .read(true)
    .write(true)
    .open("/dev/null")
    .map_err(DaemonError::Redirect)?;
  dup2_stdin(&devnull).map_err(|e| DaemonError::Redirect(e.into()))?;
  dup2_stdout(&devnull).map_err(|e| DaemonError::Redirect(e.into()))?;
  dup2_stderr(&devnull).map_err(|e| DaemonError::Redirect(e.into()))?;
  Ok(())
}

/// Foreground/Daemonized state machine plus the pid file.
pub struct DaemonController {
  state: DaemonState,
  detacher: Box<dyn Detach>,
}

impl DaemonController {
  #[must_use]
  pub fn new(detacher: Box<dyn Detach>) -> Self {
    Self {
      state: DaemonState::Foreground,
      detacher,
    }
  }

  #[must_use]
  pub fn state(&self) -> DaemonState {
    self.state
  }

  /// Detach when `requested`; a no-op once already daemonized.
  ///
  /// # Errors
  /// Returns the detach error; the state stays `Foreground` in that case.
  pub fn daemonize_if_required(&mut self, requested: bool) -> Result<DaemonState, DaemonError> {
    if requested && self.state == DaemonState::Foreground {
      debug!("Detaching from the controlling terminal");
      self.detacher.detach()?;
      self.state = DaemonState::Daemonized;
    }
    Ok(self.state)
  }

  /// Record the current pid at `path`, replacing any previous content.
  ///
  /// # Errors
  /// Returns [`DaemonError::Pidfile`] when the file cannot be written.
  pub fn set_pidfile(&self, path: &Path) -> Result<ProcessIdentity, DaemonError> {
    let pid = std::process::id();
    fs::write(path, format!("{pid}\n")).map_err(|source| DaemonError::Pidfile {
      path: path.to_path_buf(),
      source,
    })?;
    info!("Created pid file at {} with pid {pid}", path.display());
    Ok(ProcessIdentity {
      pid,
      state: self.state,
    })
  }
}

impl Default for DaemonController {
  fn default() -> Self {
    Self::new(Box::new(DoubleFork))
  }
}
