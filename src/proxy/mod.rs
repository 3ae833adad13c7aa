//! Proxy module for parsing and checking proxies
//!
//! This module provides functionality for:
//! - Parsing proxies from list formats (IP:PORT, IP:PORT:USER:PASS, USER:PASS@IP:PORT, URLs)
//! - Probing proxies through an HTTP or SOCKS5 tunnel against an echo endpoint,
//!   with a loopback relay for SOCKS5 credentials reqwest cannot send
//! - Classifying anonymity, scoring fraud risk and resolving geolocation
//! - Probing SOCKS5 relay capabilities (mail ports, UDP ASSOCIATE)
//! - Running bounded, retrying batches and summarizing them

pub mod anonymity;
pub mod batch;
pub mod capabilities;
pub mod checker;
pub mod fraud;
pub mod geo;
pub mod models;
pub mod parser;
pub mod prober;
pub mod relay;
pub mod socks5;
pub mod stats;

pub use checker::{BatchReport, CheckerConfig, ProxyChecker};
pub use geo::{GeoInfo, GeoResolver, MmdbResolver, NoGeoResolver};
pub use models::{
    AnonymityLevel, BatchStats, CheckResult, ProbeKind, Proxy, ProxyAuth, ProxyCapabilities,
    ProxyType,
};
pub use parser::ProxyParser;
