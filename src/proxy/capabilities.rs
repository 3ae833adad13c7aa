//! Capability probing through a SOCKS5 proxy: mail relay targets and UDP ASSOCIATE

use crate::proxy::models::{Proxy, ProxyCapabilities};
use crate::proxy::socks5::{connect_via, CommandRequest, TargetAddr};
use crate::Result;
use anyhow::anyhow;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

/// A well-known mail service reachable on any of `ports`
#[derive(Debug, Clone, Copy)]
pub struct MailTarget {
    pub host: &'static str,
    pub ports: &'static [u16],
}

pub const SMTP_TARGET: MailTarget = MailTarget {
    host: "smtp.gmail.com",
    ports: &[587, 465],
};

pub const POP3_TARGET: MailTarget = MailTarget {
    host: "pop.gmail.com",
    ports: &[995, 110],
};

pub const IMAP_TARGET: MailTarget = MailTarget {
    host: "imap.gmail.com",
    ports: &[993, 143],
};

/// Probe all four capabilities concurrently, each bounded by `deadline`.
pub async fn probe_capabilities(proxy: &Proxy, deadline: Instant) -> ProxyCapabilities {
    let (smtp, pop3, imap, udp) = tokio::join!(
        probe_mail(proxy, SMTP_TARGET, deadline),
        probe_mail(proxy, POP3_TARGET, deadline),
        probe_mail(proxy, IMAP_TARGET, deadline),
        supports_udp(proxy, deadline),
    );

    ProxyCapabilities {
        smtp,
        pop3,
        imap,
        udp,
    }
}

/// True if the proxy relays a TCP connection to any port of `target`
pub async fn probe_mail(proxy: &Proxy, target: MailTarget, deadline: Instant) -> bool {
    for &port in target.ports {
        if probe_connect(proxy, target.host, port, deadline).await {
            return true;
        }
    }
    false
}

/// SOCKS5 CONNECT toward `host:port`; the proxy only answers success once its
/// own TCP handshake with the target completed.
pub async fn probe_connect(proxy: &Proxy, host: &str, port: u16, deadline: Instant) -> bool {
    let request = CommandRequest::connect(TargetAddr::Domain(host.to_string()), port);
    match negotiate(proxy, &request, deadline).await {
        Ok(()) => true,
        Err(e) => {
            debug!(proxy = %proxy.key(), host, port, "connect probe failed: {:#}", e);
            false
        }
    }
}

/// SOCKS5 UDP ASSOCIATE for 0.0.0.0:0. Only the handshake is checked, no
/// datagram is relayed.
pub async fn supports_udp(proxy: &Proxy, deadline: Instant) -> bool {
    match negotiate(proxy, &CommandRequest::udp_associate(), deadline).await {
        Ok(()) => true,
        Err(e) => {
            debug!(proxy = %proxy.key(), "udp associate probe failed: {:#}", e);
            false
        }
    }
}

async fn negotiate(proxy: &Proxy, request: &CommandRequest, deadline: Instant) -> Result<()> {
    timeout_at(deadline, connect_via(proxy, request))
        .await
        .map_err(|_| anyhow!("deadline exceeded"))??;
    Ok(())
}
