//! Error types for gatedns.

use std::io;

use thiserror::Error;

/// A datagram that could not be decoded as a DNS message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("message truncated at offset {0}")]
    Truncated(usize),

    #[error("invalid label type 0x{0:02x}")]
    BadLabel(u8),

    #[error("compression pointer out of range: {0}")]
    BadPointer(usize),

    #[error("too many compression pointers")]
    PointerLoop,

    #[error("name exceeds 255 bytes")]
    NameTooLong,

    #[error("bad rdata length {len} for type {rtype}")]
    BadRdata { rtype: u16, len: usize },
}

/// Failures building a record from a request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid domain name: {0:?}")]
    InvalidName(String),

    #[error("invalid IP address: {0:?}")]
    InvalidAddress(String),

    #[error("record type not supported: {0:?}")]
    UnsupportedType(String),
}

/// Failures reading or writing the cache snapshot.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode snapshot: {0}")]
    Encode(String),

    #[error("failed to decode snapshot: {0}")]
    Decode(String),
}

/// Failures reported by (or while running) a hook action.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook failed: {0}")]
    Failed(String),

    #[error("hook timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("hook I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failures loading filter pattern files.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level error returned by the proxy entry points.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Filter(#[from] FilterError),
}
