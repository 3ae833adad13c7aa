//! Proxy data models

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Proxy type declared by the input line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    Http,
    Https,
    Socks5,
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyType::Http => write!(f, "http"),
            ProxyType::Https => write!(f, "https"),
            ProxyType::Socks5 => write!(f, "socks5"),
        }
    }
}

/// Proxy authentication credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

impl ProxyAuth {
    pub fn new(username: String, password: String) -> Self {
        Self { username, password }
    }

    /// True when neither username nor password carries anything
    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

/// A single proxy endpoint as read from the input list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proxy {
    pub host: String,
    pub port: u16,
    pub proxy_type: Option<ProxyType>,
    pub auth: Option<ProxyAuth>,
    /// Original line the proxy was parsed from
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub raw: String,
}

impl Proxy {
    /// Create a new proxy without authentication
    pub fn new(host: String, port: u16, proxy_type: Option<ProxyType>) -> Self {
        Self {
            host,
            port,
            proxy_type,
            auth: None,
            raw: String::new(),
        }
    }

    /// Create a new proxy with authentication
    pub fn with_auth(
        host: String,
        port: u16,
        proxy_type: Option<ProxyType>,
        username: String,
        password: String,
    ) -> Self {
        Self {
            host,
            port,
            proxy_type,
            auth: Some(ProxyAuth::new(username, password)),
            raw: String::new(),
        }
    }

    pub fn with_raw(mut self, raw: &str) -> Self {
        self.raw = raw.to_string();
        self
    }

    /// Credentials, if any non-empty ones were given
    pub fn credentials(&self) -> Option<&ProxyAuth> {
        self.auth.as_ref().filter(|auth| !auth.is_empty())
    }

    /// Deduplication key, `host:port` exactly as parsed
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the proxy string with auth in IP:PORT:USER:PASS format
    pub fn to_full_string(&self) -> String {
        match self.credentials() {
            Some(auth) => format!(
                "{}:{}:{}:{}",
                self.host, self.port, auth.username, auth.password
            ),
            None => self.key(),
        }
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.proxy_type {
            Some(proxy_type) => write!(f, "{}://{}", proxy_type, self.key()),
            None => write!(f, "{}", self.key()),
        }
    }
}

/// Auxiliary traffic a proxy was seen to relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyCapabilities {
    /// Mail submission (587/465)
    pub smtp: bool,
    /// Mail retrieval (995/110)
    pub pop3: bool,
    /// Mail access (993/143)
    pub imap: bool,
    /// SOCKS5 UDP ASSOCIATE accepted
    pub udp: bool,
}

/// How much of the client identity a proxy leaks to the destination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnonymityLevel {
    #[default]
    Unknown,
    Transparent,
    Anonymous,
    Elite,
}

impl fmt::Display for AnonymityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnonymityLevel::Unknown => "unknown",
            AnonymityLevel::Transparent => "transparent",
            AnonymityLevel::Anonymous => "anonymous",
            AnonymityLevel::Elite => "elite",
        };
        f.write_str(s)
    }
}

/// Result of checking a single proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub proxy: Proxy,
    pub alive: bool,
    /// HTTP status of the echo exchange, 0 when there was none
    pub status_code: u16,
    pub latency_ms: u64,
    pub country: String,
    pub city: String,
    /// Provider / ASN organisation
    pub isp: String,
    /// Exit IP as seen by the echo endpoint
    pub ip: String,
    pub anonymity: AnonymityLevel,
    pub fraud_score: f64,
    pub capabilities: ProxyCapabilities,
    pub error: Option<String>,
    /// Headers the echo endpoint observed; only used for classification
    #[serde(skip)]
    pub raw_headers: HashMap<String, String>,
}

impl CheckResult {
    /// Fresh, not-alive result for a proxy
    pub fn new(proxy: Proxy) -> Self {
        Self {
            proxy,
            alive: false,
            status_code: 0,
            latency_ms: 0,
            country: String::new(),
            city: String::new(),
            isp: String::new(),
            ip: String::new(),
            anonymity: AnonymityLevel::Unknown,
            fraud_score: 0.0,
            capabilities: ProxyCapabilities::default(),
            error: None,
            raw_headers: HashMap::new(),
        }
    }

    pub fn failed(proxy: Proxy, error: String) -> Self {
        let mut result = Self::new(proxy);
        result.error = Some(error);
        result
    }

    pub fn timeout(proxy: Proxy) -> Self {
        Self::failed(proxy, "timeout".to_string())
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }
}

/// Summary of a whole batch run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_proxies: usize,
    pub unique_proxies: usize,
    pub alive_proxies: usize,
    pub avg_latency_ms: f64,
    pub avg_fraud_score: f64,
    pub success_rate_pct: f64,
    pub total_processing_time_ms: u64,
}

/// Which tunnel the prober builds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProbeKind {
    #[default]
    Socks5,
    Https,
}

impl FromStr for ProbeKind {
    type Err = std::convert::Infallible;

    /// Anything other than `https`/`http` selects SOCKS5
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "https" | "http" => ProbeKind::Https,
            _ => ProbeKind::Socks5,
        })
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeKind::Socks5 => write!(f, "socks5"),
            ProbeKind::Https => write!(f, "https"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_creation() {
        let proxy = Proxy::new("127.0.0.1".to_string(), 8080, None);
        assert_eq!(proxy.host, "127.0.0.1");
        assert_eq!(proxy.port, 8080);
        assert!(proxy.auth.is_none());
        assert!(proxy.credentials().is_none());
    }

    #[test]
    fn test_proxy_with_auth() {
        let proxy = Proxy::with_auth(
            "127.0.0.1".to_string(),
            1080,
            Some(ProxyType::Socks5),
            "user".to_string(),
            "pass".to_string(),
        );
        let auth = proxy.credentials().unwrap();
        assert_eq!(auth.username, "user");
        assert_eq!(auth.password, "pass");
        assert_eq!(proxy.to_full_string(), "127.0.0.1:1080:user:pass");
    }

    #[test]
    fn test_empty_credentials_are_ignored() {
        let proxy = Proxy::with_auth("h".to_string(), 1, None, String::new(), String::new());
        assert!(proxy.credentials().is_none());
        assert_eq!(proxy.to_full_string(), "h:1");
    }

    #[test]
    fn test_key_ignores_credentials() {
        let a = Proxy::new("10.0.0.1".to_string(), 3128, None);
        let b = Proxy::with_auth(
            "10.0.0.1".to_string(),
            3128,
            None,
            "u".to_string(),
            "p".to_string(),
        );
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key(), "10.0.0.1:3128");
    }

    #[test]
    fn test_key_is_not_normalized() {
        let lower = Proxy::new("proxy.example".to_string(), 80, None);
        let upper = Proxy::new("PROXY.example".to_string(), 80, None);
        assert_ne!(lower.key(), upper.key());
    }

    #[test]
    fn test_proxy_display() {
        let proxy = Proxy::new("1.2.3.4".to_string(), 80, Some(ProxyType::Http));
        assert_eq!(proxy.to_string(), "http://1.2.3.4:80");
        let proxy = Proxy::new("1.2.3.4".to_string(), 80, None);
        assert_eq!(proxy.to_string(), "1.2.3.4:80");
    }

    #[test]
    fn test_probe_kind_from_str() {
        assert_eq!("https".parse::<ProbeKind>().unwrap(), ProbeKind::Https);
        assert_eq!("HTTP".parse::<ProbeKind>().unwrap(), ProbeKind::Https);
        assert_eq!("socks5".parse::<ProbeKind>().unwrap(), ProbeKind::Socks5);
        assert_eq!("whatever".parse::<ProbeKind>().unwrap(), ProbeKind::Socks5);
    }

    #[test]
    fn test_check_result_constructors() {
        let proxy = Proxy::new("127.0.0.1".to_string(), 8080, None);
        let result = CheckResult::timeout(proxy.clone());
        assert!(!result.is_alive());
        assert_eq!(result.error.as_deref(), Some("timeout"));
        assert_eq!(result.anonymity, AnonymityLevel::Unknown);

        let result = CheckResult::failed(proxy, "boom".to_string());
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(result.status_code, 0);
    }

    #[test]
    fn test_raw_headers_not_serialized() {
        let mut result = CheckResult::new(Proxy::new("h".to_string(), 1, None));
        result.raw_headers.insert("Via".to_string(), "x".to_string());
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("raw_headers"));
        assert!(json.contains("\"anonymity\":\"unknown\""));
    }
}
