// Process-wide logging: a console sink on stderr plus the configured log
// destination, which is either a local file or a syslog endpoint.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use env_logger::{Env, Logger, Target, WriteStyle};
use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::config::BootOptions;

const SYSLOG_PORT: u16 = 514;
const LOG_USER: u8 = 1;

const FACILITIES: &[(&str, u8)] = &[
  ("LOG_KERN", 0),
  ("LOG_USER", 1),
  ("LOG_MAIL", 2),
  ("LOG_DAEMON", 3),
  ("LOG_AUTH", 4),
  ("LOG_SYSLOG", 5),
  ("LOG_LPR", 6),
  ("LOG_NEWS", 7),
  ("LOG_UUCP", 8),
  ("LOG_CRON", 9),
  ("LOG_AUTHPRIV", 10),
  ("LOG_FTP", 11),
  ("LOG_LOCAL0", 16),
  ("LOG_LOCAL1", 17),
  ("LOG_LOCAL2", 18),
  ("LOG_LOCAL3", 19),
  ("LOG_LOCAL4", 20),
  ("LOG_LOCAL5", 21),
  ("LOG_LOCAL6", 22),
  ("LOG_LOCAL7", 23),
];

/// Where log records beyond the console go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
  File(PathBuf),
  Tcp { addr: String, facility: u8 },
  Udp { addr: String, facility: u8 },
  /// `file://` names a local syslog socket such as `/dev/log`.
  Unix { path: PathBuf, facility: u8 },
}

impl LogTarget {
  /// Parse a `log_file` value.
  ///
  /// Network forms: `tcp://host[:port][/LOG_FACILITY]`,
  /// `udp://host[:port][/LOG_FACILITY]` and `file:///socket/path[/LOG_FACILITY]`.
  /// Anything without one of those prefixes is a plain file path.
  ///
  /// # Errors
  /// Returns an error for an empty destination, an unknown facility or an
  /// invalid port.
  pub fn parse(dest: &str) -> Result<Self> {
    if dest.is_empty() {
      bail!("empty log destination");
    }
    if let Some(rest) = dest.strip_prefix("tcp://") {
      let (addr, facility) = parse_network(rest)?;
      return Ok(LogTarget::Tcp { addr, facility });
    }
    if let Some(rest) = dest.strip_prefix("udp://") {
      let (addr, facility) = parse_network(rest)?;
      return Ok(LogTarget::Udp { addr, facility });
    }
    if let Some(rest) = dest.strip_prefix("file://") {
      let (path, facility) = match rest.rsplit_once('/') {
        Some((path, last)) if last.starts_with("LOG_") => (path, facility_code(last)?),
        _ => (rest, LOG_USER),
      };
      if path.is_empty() {
        bail!("missing socket path in log destination {dest}");
      }
      return Ok(LogTarget::Unix {
        path: PathBuf::from(path),
        facility,
      });
    }
    Ok(LogTarget::File(PathBuf::from(dest)))
  }

  #[must_use]
  pub fn is_local(&self) -> bool {
    matches!(self, LogTarget::File(_))
  }

  fn open(&self) -> Result<Box<dyn Write + Send>> {
    match self {
      LogTarget::File(path) => {
        let file = OpenOptions::new()
          .create(true)
          .append(true)
          .open(path)
          .with_context(|| format!("failed to open log file {}", path.display()))?;
        Ok(Box::new(file))
      }
      LogTarget::Tcp { addr, .. } => {
        let stream = TcpStream::connect(addr.as_str())
          .with_context(|| format!("failed to connect to syslog at tcp://{addr}"))?;
        Ok(Box::new(stream))
      }
      LogTarget::Udp { addr, .. } => {
        let remote = resolve(addr)?;
        let local: SocketAddr = if remote.is_ipv4() {
          ([0, 0, 0, 0], 0).into()
        } else {
          (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).context("failed to bind syslog UDP socket")?;
        socket
          .connect(remote)
          .with_context(|| format!("failed to connect to syslog at udp://{addr}"))?;
        Ok(Box::new(Datagram::Udp(socket)))
      }
      LogTarget::Unix { path, .. } => {
        let socket = UnixDatagram::unbound().context("failed to create syslog socket")?;
        socket
          .connect(path)
          .with_context(|| format!("failed to connect to syslog at {}", path.display()))?;
        Ok(Box::new(Datagram::Unix(socket)))
      }
    }
  }

  fn facility(&self) -> Option<u8> {
    match self {
      LogTarget::File(_) => None,
      LogTarget::Tcp { facility, .. }
      | LogTarget::Udp { facility, .. }
      | LogTarget::Unix { facility, .. } => Some(*facility),
    }
  }
}

fn parse_network(rest: &str) -> Result<(String, u8)> {
  let (hostport, facility) = match rest.split_once('/') {
    Some((hostport, "")) => (hostport, LOG_USER),
    Some((hostport, fac)) => (hostport, facility_code(fac)?),
    None => (rest, LOG_USER),
  };
  if hostport.is_empty() {
    bail!("missing host in log destination");
  }
  let addr = match hostport.rsplit_once(':') {
    // Bare IPv6 literals contain colons but no port
    Some((host, port)) if !host.contains(':') || host.ends_with(']') => {
      let port: u16 = port
        .parse()
        .with_context(|| format!("invalid syslog port {port}"))?;
      format!("{host}:{port}")
    }
    _ => format!("{hostport}:{SYSLOG_PORT}"),
  };
  Ok((addr, facility))
}

fn facility_code(name: &str) -> Result<u8> {
  FACILITIES
    .iter()
    .find(|(n, _)| *n == name)
    .map(|(_, code)| *code)
    .ok_or_else(|| anyhow::anyhow!("unknown syslog facility {name}"))
}

fn resolve(addr: &str) -> Result<SocketAddr> {
  addr
    .to_socket_addrs()
    .with_context(|| format!("failed to resolve {addr}"))?
    .next()
    .ok_or_else(|| anyhow::anyhow!("no address for {addr}"))
}

/// One formatted record per datagram.
enum Datagram {
  Udp(UdpSocket),
  Unix(UnixDatagram),
}

impl Write for Datagram {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    match self {
      Datagram::Udp(socket) => socket.send(buf),
      Datagram::Unix(socket) => socket.send(buf),
    }
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

fn level_name(level: Level) -> &'static str {
  match level {
    Level::Error => "ERROR",
    Level::Warn => "WARNING",
    Level::Info => "INFO",
    Level::Debug => "DEBUG",
    Level::Trace => "TRACE",
  }
}

fn severity(level: Level) -> u8 {
  match level {
    Level::Error => 3,
    Level::Warn => 4,
    Level::Info => 6,
    Level::Debug | Level::Trace => 7,
  }
}

/// Fans each record out to every sink whose filter accepts it.
pub struct Dispatch {
  sinks: Vec<Logger>,
}

impl Dispatch {
  /// Most verbose level any sink accepts.
  #[must_use]
  pub fn max_level(&self) -> LevelFilter {
    self
      .sinks
      .iter()
      .map(Logger::filter)
      .max()
      .unwrap_or(LevelFilter::Off)
  }
}

impl Log for Dispatch {
  fn enabled(&self, metadata: &Metadata) -> bool {
    self.sinks.iter().any(|sink| sink.enabled(metadata))
  }

  fn log(&self, record: &Record) {
    for sink in &self.sinks {
      sink.log(record);
    }
  }

  fn flush(&self) {
    for sink in &self.sinks {
      sink.flush();
    }
  }
}

fn console_logger(opts: &BootOptions) -> Logger {
  // RUST_LOG still wins for the console when set
  env_logger::Builder::new()
    .filter_level(opts.log_level.filter())
    .parse_env(Env::default())
    .target(Target::Stderr)
    .format_timestamp_secs()
    .build()
}

fn destination_logger(target: &LogTarget, level: LevelFilter, ident: &'static str) -> Result<Logger> {
  let mut builder = env_logger::Builder::new();
  builder
    .filter_level(level)
    .write_style(WriteStyle::Never)
    .target(Target::Pipe(target.open()?));

  match target.facility() {
    None => {
      builder.format(|buf, record| {
        let ts = buf.timestamp_millis();
        writeln!(
          buf,
          "{ts} [{:<17}][{:<8}] {}",
          record.target(),
          level_name(record.level()),
          record.args()
        )
      });
    }
    Some(facility) => {
      let pid = std::process::id();
      builder.format(move |buf, record| {
        let pri = u16::from(facility) * 8 + u16::from(severity(record.level()));
        writeln!(
          buf,
          "<{pri}>{ident}[{pid}]: [{}] {}",
          level_name(record.level()),
          record.args()
        )
      });
    }
  }
  Ok(builder.build())
}

/// Build the console and destination sinks without installing them.
///
/// # Errors
/// Returns an error when the log destination cannot be parsed or opened.
pub fn build_dispatch(opts: &BootOptions, ident: &'static str) -> Result<Dispatch> {
  let mut sinks = vec![console_logger(opts)];
  if let Some(dest) = opts.log_file.as_deref().filter(|d| !d.is_empty()) {
    let target = LogTarget::parse(dest)?;
    sinks.push(destination_logger(
      &target,
      opts.logfile_level().filter(),
      ident,
    )?);
  }
  Ok(Dispatch { sinks })
}

/// Sets up process-wide logging from the assembled options.
pub trait InitLogging {
  /// # Errors
  /// Returns an error when a sink cannot be opened.
  fn setup(&self, opts: &BootOptions) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct LogInitializer {
  ident: &'static str,
}

impl LogInitializer {
  #[must_use]
  pub fn new(ident: &'static str) -> Self {
    Self { ident }
  }
}

impl InitLogging for LogInitializer {
  fn setup(&self, opts: &BootOptions) -> Result<()> {
    let dispatch = build_dispatch(opts, self.ident)?;
    let max = dispatch.max_level();
    // A logger installed elsewhere keeps its own level
    if log::set_boxed_logger(Box::new(dispatch)).is_ok() {
      log::set_max_level(max);
    }
    Ok(())
  }
}
