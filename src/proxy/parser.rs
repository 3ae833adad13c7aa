//! Proxy parser module for parsing proxy lists

use crate::proxy::models::{Proxy, ProxyType};
use crate::Result;
use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;

static URL_FORMAT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(https?|socks5h?)://(?:([^:@]*):([^@]*)@)?([^:@/]+):(\d+)/?$")
        .expect("Invalid proxy URL regex")
});

static AUTH_AT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^:@]*):([^@]*)@([^:@]+):(\d+)$").expect("Invalid user:pass@host:port regex")
});

/// Proxy parser for parsing proxies from strings and files
pub struct ProxyParser;

impl ProxyParser {
    /// Parse a single proxy line
    ///
    /// Supports formats:
    /// - IP:PORT
    /// - IP:PORT:USER:PASS
    /// - USER:PASS@IP:PORT
    /// - scheme://IP:PORT
    /// - scheme://USER:PASS@IP:PORT
    pub fn parse_line(line: &str, default_type: Option<ProxyType>) -> Option<Proxy> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let proxy = Self::parse_url_format(line)
            .or_else(|| Self::parse_auth_at_format(line, default_type))
            .or_else(|| Self::parse_colon_format(line, default_type))?;

        Some(proxy.with_raw(line))
    }

    fn parse_url_format(line: &str) -> Option<Proxy> {
        let caps = URL_FORMAT_REGEX.captures(line)?;

        let proxy_type = match &caps[1] {
            "http" => ProxyType::Http,
            "https" => ProxyType::Https,
            "socks5" | "socks5h" => ProxyType::Socks5,
            _ => return None,
        };

        let host = caps[4].to_string();
        let port = parse_port(&caps[5])?;

        match (caps.get(2), caps.get(3)) {
            (Some(user), Some(pass)) => Some(Proxy::with_auth(
                host,
                port,
                Some(proxy_type),
                user.as_str().to_string(),
                pass.as_str().to_string(),
            )),
            _ => Some(Proxy::new(host, port, Some(proxy_type))),
        }
    }

    fn parse_auth_at_format(line: &str, default_type: Option<ProxyType>) -> Option<Proxy> {
        let caps = AUTH_AT_REGEX.captures(line)?;

        let username = caps[1].to_string();
        let password = caps[2].to_string();
        let host = caps[3].to_string();
        let port = parse_port(&caps[4])?;

        Some(Proxy::with_auth(host, port, default_type, username, password))
    }

    fn parse_colon_format(line: &str, default_type: Option<ProxyType>) -> Option<Proxy> {
        let parts: Vec<&str> = line.split(':').collect();

        match parts.as_slice() {
            [host, port] if !host.is_empty() => {
                Some(Proxy::new(host.to_string(), parse_port(port)?, default_type))
            }
            [host, port, username, password] if !host.is_empty() => Some(Proxy::with_auth(
                host.to_string(),
                parse_port(port)?,
                default_type,
                username.to_string(),
                password.to_string(),
            )),
            _ => None,
        }
    }

    /// Parse proxies from a string (multiple lines)
    pub fn parse_string(content: &str, default_type: Option<ProxyType>) -> Vec<Proxy> {
        content
            .lines()
            .filter_map(|line| Self::parse_line(line, default_type))
            .collect()
    }

    /// Parse proxies from a file
    pub fn parse_file<P: AsRef<Path>>(path: P, default_type: Option<ProxyType>) -> Result<Vec<Proxy>> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read proxy list {}", path.display()))?;
        Ok(Self::parse_string(&content, default_type))
    }

    /// Save proxies to a file, one `host:port[:user:pass]` per line
    pub fn save_to_file<P: AsRef<Path>>(proxies: &[Proxy], path: P) -> Result<()> {
        let content: String = proxies
            .iter()
            .map(Proxy::to_full_string)
            .collect::<Vec<_>>()
            .join("\n");

        fs::write(path, content)?;
        Ok(())
    }
}

/// Ports are 1-65535
fn parse_port(s: &str) -> Option<u16> {
    s.parse::<u16>().ok().filter(|port| *port != 0)
}
