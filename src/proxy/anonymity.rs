//! Anonymity classification from what the echo endpoint observed

use crate::proxy::models::AnonymityLevel;
use std::collections::HashMap;

/// Headers that announce a proxy hop to the destination
const LEAK_HEADERS: &[&str] = &[
    "X-Forwarded-For",
    "X-Forwarded-Host",
    "Forwarded",
    "Via",
    "X-Real-IP",
    "Proxy-Connection",
];

/// Classify how much a proxy leaks.
///
/// `reported_ip` is the client address the destination believes it is talking
/// to; `exit_ip` is the address the proxy actually egresses from.
pub fn classify(
    reported_ip: &str,
    exit_ip: &str,
    headers: &HashMap<String, String>,
) -> AnonymityLevel {
    if reported_ip.is_empty() || exit_ip.is_empty() {
        return AnonymityLevel::Unknown;
    }

    if reported_ip != exit_ip {
        return AnonymityLevel::Transparent;
    }

    let leaked = headers.iter().any(|(name, value)| {
        !value.trim().is_empty()
            && LEAK_HEADERS
                .iter()
                .any(|leak| leak.eq_ignore_ascii_case(name))
    });

    if leaked {
        AnonymityLevel::Anonymous
    } else {
        AnonymityLevel::Elite
    }
}

/// Split an echo `origin` field (`"a"` or `"a, b, ..."`) into the address the
/// destination reports for the client (first token) and the proxy exit (last
/// token).
pub fn origin_addresses(origin: &str) -> (&str, &str) {
    let mut tokens = origin.split(',').map(str::trim).filter(|t| !t.is_empty());
    let first = tokens.next().unwrap_or("");
    let last = tokens.last().unwrap_or(first);
    (first, last)
}
