//! Configuration of the KeyServer daemon.

use std::fs::File;
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use std::{env, fmt, thread};

use log::{error, info, LevelFilter};
use serde::de;
use serde::{Deserialize, Deserializer};
#[cfg(unix)]
use syslog::Facility;

use crate::constants::*;
use crate::signing::DistinguishedName;


//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    }

    fn port() -> u16 {
        DEFAULT_PORT
    }

    fn threads() -> usize {
        thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    }

    fn issuer() -> String {
        DEFAULT_ISSUER.to_string()
    }

    fn key_bits() -> u32 {
        DEFAULT_KEY_BITS
    }

    fn validity_days() -> u32 {
        DEFAULT_VALIDITY_DAYS
    }

    fn poll_timeout_ms() -> u64 {
        DEFAULT_POLL_TIMEOUT_MS
    }

    fn log_level() -> LevelFilter {
        match env::var(KEYSERVER_ENV_LOG_LEVEL) {
            Ok(level) => match LevelFilter::from_str(&level) {
                Ok(level) => level,
                Err(_) => {
                    eprintln!(
                        "Unrecognized value for log level in env var {}, \
                         using info",
                        KEYSERVER_ENV_LOG_LEVEL
                    );
                    LevelFilter::Info
                }
            },
            _ => LevelFilter::Info,
        }
    }

    fn log_type() -> LogType {
        LogType::Stderr
    }

    fn log_file() -> PathBuf {
        PathBuf::from(DEFAULT_LOG_FILE)
    }

    fn syslog_facility() -> String {
        "daemon".to_string()
    }
}


//------------ Config --------------------------------------------------------

/// Global configuration for the KeyServer daemon.
///
/// This is read from an optional TOML config file. Command line options
/// override any of the settings in the file.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "ConfigDefaults::ip")]
    pub ip: IpAddr,

    #[serde(default = "ConfigDefaults::port")]
    pub port: u16,

    /// The number of issuance worker threads.
    #[serde(default = "ConfigDefaults::threads")]
    pub threads: usize,

    /// The distinguished name of the CA, e.g. `CN=KeyServer CA`.
    #[serde(default = "ConfigDefaults::issuer")]
    pub issuer: String,

    /// The PEM file with the CA private key.
    #[serde(default)]
    pub ca_key: Option<PathBuf>,

    #[serde(default = "ConfigDefaults::key_bits")]
    pub key_bits: u32,

    #[serde(default = "ConfigDefaults::validity_days")]
    pub validity_days: u32,

    #[serde(default = "ConfigDefaults::poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    #[serde(
        default = "ConfigDefaults::log_level",
        deserialize_with = "de_level_filter"
    )]
    pub log_level: LevelFilter,

    #[serde(default = "ConfigDefaults::log_type")]
    pub log_type: LogType,

    #[serde(default = "ConfigDefaults::log_file")]
    pub log_file: PathBuf,

    #[serde(default = "ConfigDefaults::syslog_facility")]
    pub syslog_facility: String,
}

impl Config {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn ca_key(&self) -> Option<&Path> {
        self.ca_key.as_deref()
    }
}

/// # Loading
impl Config {
    /// Creates the config at startup and initializes logging.
    ///
    /// If the command line arguments are not usable, the process exits
    /// with a usage message.
    pub fn create() -> Result<Self, ConfigError> {
        let options = <Options as clap::Parser>::parse();
        let config_file = options.config.clone();
        let config = Self::from_options(options)?;
        config.init_logging()?;
        match config_file {
            Some(path) => info!(
                "{} uses configuration file: {}",
                KEYSERVER_APP, path.display()
            ),
            None => info!("{} uses built-in defaults", KEYSERVER_APP),
        }
        Ok(config)
    }

    /// Builds a verified config from the command line options.
    pub fn from_options(options: Options) -> Result<Self, ConfigError> {
        let mut config = match options.config.as_ref() {
            Some(path) => Self::read_config(path).map_err(|e| {
                ConfigError::Other(format!(
                    "Error parsing config file: {}, error: {}",
                    path.display(), e
                ))
            })?,
            None => Self::parse_str("")?,
        };
        config.apply_options(options);
        config.verify()?;
        Ok(config)
    }

    pub fn read_config(file: &Path) -> Result<Self, ConfigError> {
        let mut v = String::new();
        let mut f = File::open(file)?;
        f.read_to_string(&mut v)?;
        Self::parse_str(&v)
    }

    pub fn parse_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    fn apply_options(&mut self, options: Options) {
        if let Some(ip) = options.ip {
            self.ip = ip
        }
        if let Some(port) = options.port {
            self.port = port
        }
        if let Some(threads) = options.threads {
            self.threads = threads
        }
        if let Some(issuer) = options.issuer {
            self.issuer = issuer
        }
        if options.ca_key.is_some() {
            self.ca_key = options.ca_key
        }
        if let Some(bits) = options.key_bits {
            self.key_bits = bits
        }
        if let Some(level) = options.log_level {
            self.log_level = level
        }
        if let Some(log_type) = options.log_type {
            self.log_type = log_type
        }
    }

    pub fn verify(&self) -> Result<(), ConfigError> {
        if self.threads < 1 {
            return Err(ConfigError::other("threads must be at least 1"));
        }

        if !(MIN_KEY_BITS..=MAX_KEY_BITS).contains(&self.key_bits) {
            return Err(ConfigError::Other(format!(
                "key_bits must be between {} and {}",
                MIN_KEY_BITS, MAX_KEY_BITS
            )));
        }

        if self.validity_days < 1 {
            return Err(ConfigError::other("validity_days must be at least 1"));
        }

        let not_after = chrono::Utc::now().timestamp()
            + i64::from(self.validity_days) * 24 * 60 * 60;
        if not_after > MAX_NOT_AFTER {
            return Err(ConfigError::other(
                "validity_days reaches beyond the year 9999"
            ));
        }

        if self.poll_timeout_ms < 1 {
            return Err(ConfigError::other(
                "poll_timeout_ms must be at least 1"
            ));
        }

        DistinguishedName::parse(&self.issuer).map_err(|e| {
            ConfigError::Other(format!("Invalid issuer: {}", e))
        })?;

        if self.ca_key.is_none() {
            return Err(ConfigError::Other(format!(
                "No CA key configured. Use --ca-key, the {} environment \
                 variable or ca_key in the config file.",
                KEYSERVER_ENV_CA_KEY
            )));
        }

        Ok(())
    }
}

/// # Logging
impl Config {
    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::File => self.file_logger(&self.log_file),
            LogType::Stderr => self.stderr_logger(),
            LogType::Syslog => self.syslog_logger(),
        }
    }

    /// Creates a stderr logger.
    fn stderr_logger(&self) -> Result<(), ConfigError> {
        init_stderr_logging(self.log_level)
    }

    /// Creates a file logger using the file provided by `path`.
    fn file_logger(&self, path: &Path) -> Result<(), ConfigError> {
        let file = match fern::log_file(path) {
            Ok(file) => file,
            Err(err) => {
                let error_string = format!(
                    "Failed to open log file '{}': {}",
                    path.display(), err
                );
                error!("{}", error_string.as_str());
                return Err(ConfigError::Other(error_string));
            }
        };
        self.fern_logger().chain(file).apply().map_err(|e| {
            ConfigError::Other(format!("Failed to init file logging: {}", e))
        })
    }

    /// Creates a syslog logger and configures correctly.
    #[cfg(unix)]
    fn syslog_logger(&self) -> Result<(), ConfigError> {
        let facility = Facility::from_str(&self.syslog_facility)
            .map_err(|_| ConfigError::other("Invalid syslog_facility"))?;
        let process = env::current_exe()
            .ok()
            .and_then(|path| {
                path.file_name()
                    .and_then(std::ffi::OsStr::to_str)
                    .map(ToString::to_string)
            })
            .unwrap_or_else(|| String::from("keyserver"));
        let formatter = syslog::Formatter3164 {
            facility,
            hostname: None,
            process,
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter.clone())
            .or_else(|_| syslog::tcp(formatter.clone(), ("127.0.0.1", 601)))
            .or_else(|_| {
                syslog::udp(formatter, ("127.0.0.1", 0), ("127.0.0.1", 514))
            });
        match logger {
            Ok(logger) => {
                self.fern_logger().chain(logger).apply().map_err(|e| {
                    ConfigError::Other(format!("Failed to init syslog: {}", e))
                })
            }
            Err(err) => {
                let msg = format!("Cannot connect to syslog: {}", err);
                Err(ConfigError::Other(msg))
            }
        }
    }

    #[cfg(not(unix))]
    fn syslog_logger(&self) -> Result<(), ConfigError> {
        Err(ConfigError::other("syslog is only supported on Unix systems"))
    }

    /// Creates and returns a fern logger with log level tweaks
    fn fern_logger(&self) -> fern::Dispatch {
        fern_logger(self.log_level)
    }
}

/// Sends log messages up to `level` to stderr.
///
/// The client uses this directly since it has no config file.
pub fn init_stderr_logging(level: LevelFilter) -> Result<(), ConfigError> {
    fern_logger(level).chain(io::stderr()).apply().map_err(|e| {
        ConfigError::Other(format!("Failed to init stderr logging: {}", e))
    })
}

fn fern_logger(log_level: LevelFilter) -> fern::Dispatch {
    // suppress overly noisy logging
    let framework_level = log_level.min(LevelFilter::Warn);

    let show_target = log_level == LevelFilter::Trace
        || log_level == LevelFilter::Debug;

    fern::Dispatch::new()
        .format(move |out, message, record| {
            if show_target {
                out.finish(format_args!(
                    "{} [{}] [{}] {}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    record.target(),
                    message
                ))
            } else {
                out.finish(format_args!(
                    "{} [{}] {}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    message
                ))
            }
        })
        .level(log_level)
        .level_for("mio", framework_level)
        .level_for("tokio", framework_level)
}

fn de_level_filter<'de, D>(d: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let string = String::deserialize(d)?;
    LevelFilter::from_str(&string).map_err(de::Error::custom)
}


//------------ Options -------------------------------------------------------

/// The command line options for the KeyServer daemon.
#[derive(Clone, Debug, Default, clap::Parser)]
#[command(
    version,
    about = "Issues private keys and CA-signed certificates over TCP.",
)]
pub struct Options {
    /// Read the configuration from this TOML file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// The address to listen on [default: 0.0.0.0]
    #[arg(long)]
    pub ip: Option<IpAddr>,

    /// The port to listen on [default: 9000]
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Number of issuance worker threads [default: number of cores]
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// The distinguished name of the CA [default: "CN=KeyServer CA"]
    #[arg(long)]
    pub issuer: Option<String>,

    /// The PEM file with the CA private key.
    #[arg(long, value_name = "FILE", env = KEYSERVER_ENV_CA_KEY)]
    pub ca_key: Option<PathBuf>,

    /// Size of generated RSA keys in bits [default: 8192]
    #[arg(long)]
    pub key_bits: Option<u32>,

    /// The log level [default: info]
    #[arg(long)]
    pub log_level: Option<LevelFilter>,

    /// Where to log to: stderr, file or syslog [default: stderr]
    #[arg(long)]
    pub log_type: Option<LogType>,
}


//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    TomlError(toml::de::Error),
    Other(String),
}

impl ConfigError {
    pub fn other(s: &str) -> ConfigError {
        ConfigError::Other(s.to_string())
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => e.fmt(f),
            ConfigError::TomlError(e) => e.fmt(f),
            ConfigError::Other(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::IoError(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::TomlError(e)
    }
}


//------------ LogType -------------------------------------------------------

/// The target to log to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogType {
    Stderr,
    File,
    Syslog,
}

impl FromStr for LogType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stderr" => Ok(LogType::Stderr),
            "file" => Ok(LogType::File),
            "syslog" => Ok(LogType::Syslog),
            _ => Err(format!(
                "expected \"stderr\", \"file\" or \"syslog\", found: \"{}\"",
                s
            )),
        }
    }
}

impl<'de> Deserialize<'de> for LogType {
    fn deserialize<D>(d: D) -> Result<LogType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        LogType::from_str(&string).map_err(de::Error::custom)
    }
}


//------------ Tests ---------------------------------------------------------
