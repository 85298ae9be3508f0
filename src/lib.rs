//! dnsgate - a caching, filtering DNS resolver.
//!
//! Queries for blocked domains get a synthetic reply, everything else is
//! answered from a TTL-aware cache or by racing all configured upstreams.

pub mod cache;
pub mod dns;
pub mod error;
pub mod filter;
pub mod proxy;
pub mod resolver;
pub mod stats;
pub mod transport;
pub mod upstream;

pub use error::{Error, Result};
