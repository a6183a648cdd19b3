//! Configuration types for gatedns.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Port used for forwarders given without one.
pub const DNS_PORT: u16 = 53;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on.
    #[serde(default = "default_bind")]
    pub bind: IpAddr,

    /// UDP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Upstream resolvers, as `ip` or `ip:port`.
    #[serde(default)]
    pub forwarders: Vec<String>,

    /// Directory holding the cache snapshot files.
    #[serde(default = "default_rw_dir")]
    pub rw_dir: PathBuf,

    /// Directory of whitelist pattern files.
    #[serde(default)]
    pub whitelist_dir: Option<PathBuf>,

    /// Directory of blacklist pattern files.
    #[serde(default)]
    pub blacklist_dir: Option<PathBuf>,

    /// Seconds a forwarded query may wait for its reply before it is forgotten.
    #[serde(default = "default_pending_timeout")]
    pub pending_timeout_secs: u64,

    #[serde(default)]
    pub hooks: HooksConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Hook actions, one optional program per record kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HooksConfig {
    #[serde(default)]
    pub a: Option<CommandConfig>,

    #[serde(default)]
    pub aaaa: Option<CommandConfig>,

    #[serde(default)]
    pub ptr: Option<CommandConfig>,

    /// Wall-clock limit for a single hook call.
    #[serde(default = "default_hook_timeout")]
    pub timeout_secs: u64,

    /// Jobs queued beyond this are dropped.
    #[serde(default = "default_hook_queue")]
    pub queue_size: usize,
}

/// A program run by a hook; resolved values are appended to `args`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "gatedns=debug,warn").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Config {
    /// Read and parse a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Check the settings the proxy cannot start without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.forwarders.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one forwarder is required".to_string(),
            ));
        }
        self.forwarder_addrs()?;
        if self.pending_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "pending_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn forwarder_addrs(&self) -> Result<Vec<SocketAddr>, ConfigError> {
        self.forwarders
            .iter()
            .map(|f| parse_forwarder(f))
            .collect()
    }

    pub fn pending_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            forwarders: Vec::new(),
            rw_dir: default_rw_dir(),
            whitelist_dir: None,
            blacklist_dir: None,
            pending_timeout_secs: default_pending_timeout(),
            hooks: HooksConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl HooksConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            a: None,
            aaaa: None,
            ptr: None,
            timeout_secs: default_hook_timeout(),
            queue_size: default_hook_queue(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Parse `ip` or `ip:port`; bare addresses get port 53.
pub fn parse_forwarder(s: &str) -> Result<SocketAddr, ConfigError> {
    let s = s.trim();
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(addr);
    }
    s.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DNS_PORT))
        .map_err(|_| ConfigError::Invalid(format!("invalid forwarder address: {:?}", s)))
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    DNS_PORT
}

fn default_rw_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_pending_timeout() -> u64 {
    10
}

fn default_hook_timeout() -> u64 {
    10
}

fn default_hook_queue() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}
