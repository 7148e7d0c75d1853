use std::fs::{self, Metadata};
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::unistd::{AccessFlags, Uid, User, access};
use thiserror::Error;

/// Exit status for an unknown user (sysexits `EX_NOUSER`).
pub const EX_NOUSER: i32 = 67;

/// Log destinations with these prefixes are network sinks and are never
/// checked on the local filesystem.
pub const NETWORK_SCHEMES: &[&str] = &["tcp://", "udp://", "file://"];

const WORLD_WRITABLE: u32 = 0o002;
const STICKY: u32 = 0o1000;

#[derive(Debug, Error)]
pub enum VerifyError {
  #[error("failed to access {}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("{} is not a directory", path.display())]
  NotADir { path: PathBuf },
  #[error("{} is a directory", path.display())]
  IsADir { path: PathBuf },
  #[error(
    "{} is owned by uid {found}, expected {user} (uid {expected})",
    path.display()
  )]
  Ownership {
    path: PathBuf,
    user: String,
    expected: u32,
    found: u32,
  },
  #[error("{} has unsafe permissions {mode:o}", path.display())]
  Permissions { path: PathBuf, mode: u32 },
  #[error("user {0} is not available")]
  UnknownUser(String),
}

impl VerifyError {
  /// OS error number used as the process exit status.
  #[must_use]
  pub fn errno(&self) -> i32 {
    match self {
      VerifyError::Io { source, .. } => source.raw_os_error().unwrap_or(Errno::EIO as i32),
      VerifyError::NotADir { .. } => Errno::ENOTDIR as i32,
      VerifyError::IsADir { .. } => Errno::EISDIR as i32,
      VerifyError::Ownership { .. } => Errno::EPERM as i32,
      VerifyError::Permissions { .. } => Errno::EACCES as i32,
      VerifyError::UnknownUser(_) => EX_NOUSER,
    }
  }
}

/// Filesystem checks run before the service trusts its directories.
pub trait Verify {
  /// Verify that every directory exists, is accessible and owned by `user`.
  ///
  /// # Errors
  /// Returns the first failing check.
  fn verify_env(&self, dirs: &[PathBuf], user: &str) -> Result<(), VerifyError>;

  /// Verify each file's directory and, when it already exists, the file.
  ///
  /// # Errors
  /// Returns the first failing check.
  fn verify_files(&self, files: &[PathBuf], user: &str) -> Result<(), VerifyError>;
}

/// Checks against the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvVerifier;

impl Verify for EnvVerifier {
  fn verify_env(&self, dirs: &[PathBuf], user: &str) -> Result<(), VerifyError> {
    verify_env(dirs, user)
  }

  fn verify_files(&self, files: &[PathBuf], user: &str) -> Result<(), VerifyError> {
    verify_files(files, user)
  }
}

/// # Errors
/// See [`Verify::verify_env`].
pub fn verify_env(dirs: &[PathBuf], user: &str) -> Result<(), VerifyError> {
  let uid = resolve_uid(user)?;
  for dir in dirs {
    check_dir(dir, uid, user)?;
  }
  Ok(())
}

/// # Errors
/// See [`Verify::verify_files`].
pub fn verify_files(files: &[PathBuf], user: &str) -> Result<(), VerifyError> {
  let uid = resolve_uid(user)?;
  for file in files {
    check_dir(&dirname(file), uid, user)?;
    match fs::metadata(file) {
      Ok(meta) => check_file(file, &meta, uid, user)?,
      // Created later by the logging setup
      Err(err) if err.kind() == io::ErrorKind::NotFound => {}
      Err(source) => {
        return Err(VerifyError::Io {
          path: file.clone(),
          source,
        });
      }
    }
  }
  Ok(())
}

/// True when `dest` names a network log sink rather than a local file.
#[must_use]
pub fn is_network_destination(dest: &str) -> bool {
  NETWORK_SCHEMES.iter().any(|scheme| dest.starts_with(scheme))
}

/// Name of the user running this process.
///
/// Falls back to `USER`/`LOGNAME` when the effective uid has no passwd entry.
#[must_use]
pub fn current_user() -> String {
  let uid = Uid::effective();
  if let Ok(Some(user)) = User::from_uid(uid) {
    return user.name;
  }
  ["USER", "LOGNAME"]
    .iter()
    .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
    .unwrap_or_else(|| uid.to_string())
}

/// Parent directory of `path`, `.` for bare file names.
#[must_use]
pub fn dirname(path: &Path) -> PathBuf {
  match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
    _ => PathBuf::from("."),
  }
}

fn resolve_uid(user: &str) -> Result<Uid, VerifyError> {
  match User::from_name(user) {
    Ok(Some(found)) => Ok(found.uid),
    _ if user == current_user() => Ok(Uid::effective()),
    _ => Err(VerifyError::UnknownUser(user.to_string())),
  }
}

fn check_dir(path: &Path, uid: Uid, user: &str) -> Result<(), VerifyError> {
  let meta = fs::metadata(path).map_err(|source| VerifyError::Io {
    path: path.to_path_buf(),
    source,
  })?;
  if !meta.is_dir() {
    return Err(VerifyError::NotADir {
      path: path.to_path_buf(),
    });
  }
  check_access(path, AccessFlags::R_OK | AccessFlags::X_OK)?;
  check_owner(path, &meta, uid, user)?;

  let mode = meta.permissions().mode();
  if mode & WORLD_WRITABLE != 0 && mode & STICKY == 0 {
    return Err(VerifyError::Permissions {
      path: path.to_path_buf(),
      mode: mode & 0o7777,
    });
  }
  Ok(())
}

fn check_file(path: &Path, meta: &Metadata, uid: Uid, user: &str) -> Result<(), VerifyError> {
  if meta.is_dir() {
    return Err(VerifyError::IsADir {
      path: path.to_path_buf(),
    });
  }
  check_access(path, AccessFlags::R_OK | AccessFlags::W_OK)?;
  check_owner(path, meta, uid, user)?;

  let mode = meta.permissions().mode();
  if mode & WORLD_WRITABLE != 0 {
    return Err(VerifyError::Permissions {
      path: path.to_path_buf(),
      mode: mode & 0o7777,
    });
  }
  Ok(())
}

fn check_access(path: &Path, flags: AccessFlags) -> Result<(), VerifyError> {
  access(path, flags).map_err(|errno| VerifyError::Io {
    path: path.to_path_buf(),
    source: io::Error::from(errno),
  })
}

fn check_owner(path: &Path, meta: &Metadata, uid: Uid, user: &str) -> Result<(), VerifyError> {
  if meta.uid() != uid.as_raw() {
    return Err(VerifyError::Ownership {
      path: path.to_path_buf(),
      user: user.to_string(),
      expected: uid.as_raw(),
      found: meta.uid(),
    });
  }
  Ok(())
}
