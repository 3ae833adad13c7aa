//! Loopback SOCKS5 relay for upstreams whose credentials reqwest cannot send
//!
//! reqwest's SOCKS client refuses a username or password of length zero, while
//! list entries such as `host:port:user:` are common. The echo client then
//! speaks no-auth SOCKS5 to this relay, and every CONNECT it issues is redialed
//! through the upstream with [`Socks5Handshake`](crate::proxy::socks5::Socks5Handshake),
//! the same handshake the capability probe uses.

use crate::proxy::models::{Proxy, ProxyAuth};
use crate::proxy::socks5::{
    connect_via, CommandRequest, Greeting, Reply, SOCKS5_AUTH_NONE, SOCKS5_AUTH_UNACCEPTABLE,
    SOCKS5_CMD_CONNECT, SOCKS5_REPLY_COMMAND_NOT_SUPPORTED, SOCKS5_REPLY_GENERAL_FAILURE,
    SOCKS5_REPLY_SUCCESS, SOCKS5_VERSION,
};
use crate::Result;
use anyhow::{anyhow, bail, Context};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::io::{copy_bidirectional, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

/// True when reqwest cannot carry `auth` itself
pub fn needs_relay(auth: &ProxyAuth) -> bool {
    let fits = |field: &str| (1..=255).contains(&field.len());
    !fits(&auth.username) || !fits(&auth.password)
}

/// A listener on 127.0.0.1 forwarding to one upstream proxy until `deadline`.
/// Dropping it stops accepting.
pub struct AuthRelay {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl AuthRelay {
    pub async fn bind(upstream: Proxy, deadline: Instant) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .context("failed to bind relay listener")?;
        let addr = listener.local_addr()?;

        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let upstream = upstream.clone();
                tokio::spawn(async move {
                    let relayed = timeout_at(deadline, relay_connection(socket, &upstream))
                        .await
                        .map_err(|_| anyhow!("deadline exceeded"));
                    if let Err(e) = relayed.and_then(|r| r) {
                        debug!(proxy = %upstream.key(), "relay connection ended: {:#}", e);
                    }
                });
            }
        });

        Ok(Self { addr, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for AuthRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn relay_connection(mut client: TcpStream, upstream: &Proxy) -> Result<()> {
    let greeting = Greeting::read_from(&mut client).await?;
    if !greeting.methods.contains(&SOCKS5_AUTH_NONE) {
        client
            .write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_UNACCEPTABLE])
            .await?;
        bail!("client did not offer no-auth");
    }
    client.write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_NONE]).await?;

    let request = CommandRequest::read_from(&mut client).await?;
    if request.command != SOCKS5_CMD_CONNECT {
        client
            .write_all(&Reply::frame(SOCKS5_REPLY_COMMAND_NOT_SUPPORTED))
            .await?;
        bail!("unsupported command {:#04x}", request.command);
    }

    let mut remote = match connect_via(upstream, &request).await {
        Ok(remote) => remote,
        Err(e) => {
            client
                .write_all(&Reply::frame(SOCKS5_REPLY_GENERAL_FAILURE))
                .await?;
            return Err(e.context("upstream connect failed"));
        }
    };
    client.write_all(&Reply::frame(SOCKS5_REPLY_SUCCESS)).await?;

    copy_bidirectional(&mut client, &mut remote).await?;
    Ok(())
}
