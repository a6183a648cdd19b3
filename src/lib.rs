//! gatedns - a caching, filtering DNS forwarder.
//!
//! Answers from a persisted record cache when it can, forwards to upstream
//! resolvers when it cannot, and runs hooks for names on the whitelist.

pub mod admin;
pub mod cache;
pub mod config;
pub mod dns;
pub mod error;
pub mod filter;
pub mod hook;
pub mod pending;
pub mod proxy;
pub mod record;
pub mod resolver;
pub mod stats;
pub mod store;
pub mod transport;

pub use config::Config;
pub use error::Error;
pub use proxy::{Proxy, run};
