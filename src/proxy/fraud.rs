//! Heuristic fraud/risk score for an exit IP

use std::net::{IpAddr, Ipv4Addr};

/// Provider name fragments that point at hosting rather than residential lines
const DATACENTER_KEYWORDS: &[&str] = &[
    "cloud",
    "hosting",
    "data",
    "server",
    "colo",
    "digitalocean",
    "aws",
    "amazon",
    "google",
    "azure",
    "hetzner",
    "ovh",
];

const SCORE_MISSING_IP: f64 = 80.0;
const SCORE_INVALID_IP: f64 = 90.0;
const SCORE_NON_PUBLIC_IP: f64 = 95.0;
const SCORE_DATACENTER: f64 = 70.0;
const SCORE_RESIDENTIAL: f64 = 20.0;

/// Estimate a 0..=100 risk score; higher means more likely to be flagged.
pub fn estimate_fraud_score(ip: &str, provider: &str) -> f64 {
    if ip.is_empty() {
        return SCORE_MISSING_IP;
    }

    let Ok(addr) = ip.trim().parse::<IpAddr>() else {
        return SCORE_INVALID_IP;
    };

    if is_non_public(&addr) {
        return SCORE_NON_PUBLIC_IP;
    }

    let provider = provider.to_lowercase();
    if DATACENTER_KEYWORDS.iter().any(|kw| provider.contains(kw)) {
        return SCORE_DATACENTER;
    }

    SCORE_RESIDENTIAL
}

/// Private, loopback and link-local (unicast and multicast) ranges
fn is_non_public(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_non_public_v4(v4),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || (first & 0xfe00) == 0xfc00 // fc00::/7 unique local
                || (first & 0xffc0) == 0xfe80 // fe80::/10 link local
                || (first & 0xff0f) == 0xff02 // link-local multicast
                || v6.to_ipv4_mapped().is_some_and(|v4| is_non_public_v4(&v4))
        }
    }
}

fn is_non_public_v4(v4: &Ipv4Addr) -> bool {
    v4.is_private()
        || v4.is_loopback()
        || v4.is_link_local()
        || v4.octets()[..3] == [224, 0, 0] // 224.0.0.0/24 link-local multicast
}
