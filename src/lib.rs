//! proxycheck - concurrent proxy checker
//!
//! Validates HTTP(S) and SOCKS5 proxies for liveness, latency, geolocation,
//! anonymity, heuristic fraud risk and SOCKS5 relay capabilities.

pub mod output;
pub mod proxy;

pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
