//! Single-attempt probe of a proxy through an external echo endpoint

use crate::proxy::anonymity::{classify, origin_addresses};
use crate::proxy::capabilities::probe_capabilities;
use crate::proxy::checker::CheckerConfig;
use crate::proxy::fraud::estimate_fraud_score;
use crate::proxy::geo::GeoResolver;
use crate::proxy::models::{CheckResult, ProbeKind, Proxy};
use crate::proxy::relay::{needs_relay, AuthRelay};
use crate::Result;
use reqwest::{Client, Proxy as ReqwestProxy};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

/// Payload of an httpbin-style `/get` endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EchoResponse {
    /// Caller address as seen by the endpoint, possibly `"a, b"`
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Builds a tunneled client for one proxy and runs one echo exchange through it
#[derive(Clone)]
pub struct Prober {
    kind: ProbeKind,
    echo_url: String,
    timeout: Duration,
    check_capabilities: bool,
    resolver: Arc<dyn GeoResolver>,
}

impl Prober {
    pub fn from_config(config: &CheckerConfig) -> Self {
        Self {
            kind: config.probe_kind,
            echo_url: config.echo_url.clone(),
            timeout: config.timeout,
            check_capabilities: config.check_capabilities,
            resolver: Arc::clone(&config.resolver),
        }
    }

    /// Run one attempt. Never fails: every problem ends up in the result.
    pub async fn probe_once(&self, proxy: &Proxy) -> CheckResult {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut out = CheckResult::new(proxy.clone());

        let (client, relay) = match self.build_client(proxy, deadline).await {
            Ok(built) => built,
            Err(e) => {
                out.error = Some(format!("client_build_error: {:#}", e));
                return out;
            }
        };

        let echo = match timeout_at(deadline, self.fetch_echo(&client)).await {
            Ok(Ok(echo)) => Some(echo),
            Ok(Err(e)) => {
                out.error = Some(format!("echo_error: {:#}", e));
                None
            }
            Err(_) => {
                out.error = Some("timeout".to_string());
                None
            }
        };
        drop(relay);

        self.shape_result(&mut out, echo);
        out.latency_ms = started.elapsed().as_millis() as u64;

        if self.kind == ProbeKind::Socks5 && self.check_capabilities {
            out.capabilities = probe_capabilities(proxy, deadline).await;
        }

        debug!(
            proxy = %proxy.key(),
            kind = %self.kind,
            alive = out.alive,
            anonymity = %out.anonymity,
            latency_ms = out.latency_ms,
            "probe attempt finished"
        );
        out
    }

    /// Echo payload → anonymity, geo, aliveness, fraud score. Shared by both
    /// tunnel kinds.
    fn shape_result(&self, out: &mut CheckResult, echo: Option<(u16, EchoResponse)>) {
        let Some((status, echo)) = echo else {
            // The resolver still sees the (empty) origin and is expected to reject it.
            if let Err(e) = self.resolver.lookup("") {
                debug!(proxy = %out.proxy.key(), "geo lookup without origin: {:#}", e);
            }
            return;
        };

        let (reported, exit) = origin_addresses(&echo.origin);
        out.anonymity = classify(reported, exit, &echo.headers);
        let origin = reported.to_string();
        out.raw_headers = echo.headers;

        let info = match self.resolver.lookup(&origin) {
            Ok(info) => info,
            Err(e) => {
                out.error = Some(format!("geo_error: {:#}", e));
                return;
            }
        };

        out.alive = true;
        out.error = None;
        out.status_code = status;
        out.ip = origin;
        out.country = info.country;
        out.city = info.city;
        out.isp = info.isp;

        if !out.ip.is_empty() {
            out.fraud_score = estimate_fraud_score(&out.ip, &out.isp);
        }
    }

    /// The relay, when one is needed, must outlive the echo exchange.
    async fn build_client(
        &self,
        proxy: &Proxy,
        deadline: Instant,
    ) -> Result<(Client, Option<AuthRelay>)> {
        let (tunnel, relay) = match self.kind {
            ProbeKind::Https => (http_tunnel(proxy)?, None),
            ProbeKind::Socks5 if proxy.credentials().is_some_and(needs_relay) => {
                let relay = AuthRelay::bind(proxy.clone(), deadline).await?;
                let tunnel = ReqwestProxy::all(format!("socks5h://{}", relay.local_addr()))?;
                (tunnel, Some(relay))
            }
            ProbeKind::Socks5 => (socks5_tunnel(proxy)?, None),
        };

        let client = Client::builder()
            .proxy(tunnel)
            .timeout(self.timeout)
            .build()?;

        Ok((client, relay))
    }

    async fn fetch_echo(&self, client: &Client) -> Result<(u16, EchoResponse)> {
        let response = client.get(&self.echo_url).send().await?;
        let status = response.status().as_u16();
        let echo = response.json::<EchoResponse>().await?;
        Ok((status, echo))
    }
}

fn authority(proxy: &Proxy) -> String {
    if proxy.host.contains(':') && !proxy.host.starts_with('[') {
        format!("[{}]:{}", proxy.host, proxy.port)
    } else {
        proxy.key()
    }
}

/// Plain HTTP proxy; https targets go through CONNECT
fn http_tunnel(proxy: &Proxy) -> Result<ReqwestProxy> {
    let mut tunnel = ReqwestProxy::all(format!("http://{}", authority(proxy)))?;
    if let Some(auth) = proxy.credentials() {
        tunnel = tunnel.basic_auth(&auth.username, &auth.password);
    }
    Ok(tunnel)
}

/// SOCKS5 with remote name resolution
fn socks5_tunnel(proxy: &Proxy) -> Result<ReqwestProxy> {
    let mut tunnel = ReqwestProxy::all(format!("socks5h://{}", authority(proxy)))?;
    if let Some(auth) = proxy.credentials() {
        tunnel = tunnel.basic_auth(&auth.username, &auth.password);
    }
    Ok(tunnel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::geo::{GeoInfo, NoGeoResolver};
    use crate::proxy::models::{AnonymityLevel, ProxyCapabilities};
    use crate::proxy::socks5::{CommandRequest, Reply, TargetAddr, SOCKS5_CMD_CONNECT};
    use anyhow::anyhow;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Resolver returning fixed data and recording what it was asked
    #[derive(Default)]
    struct RecordingResolver {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    impl GeoResolver for RecordingResolver {
        fn lookup(&self, ip: &str) -> Result<GeoInfo> {
            self.calls.lock().unwrap().push(ip.to_string());
            if self.fail || ip.is_empty() {
                return Err(anyhow!("lookup failed"));
            }
            Ok(GeoInfo {
                country: "Germany".to_string(),
                city: "Berlin".to_string(),
                isp: "Hetzner Online GmbH".to_string(),
            })
        }
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    async fn answer_echo(socket: &mut TcpStream, body: &str) -> std::io::Result<()> {
        read_request(socket).await;
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await
    }

    /// HTTP proxy that answers every forwarded request itself with `body`
    async fn spawn_echo_proxy(body: &'static str) -> Proxy {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let _ = answer_echo(&mut socket, body).await;
                });
            }
        });
        Proxy::new(addr.ip().to_string(), addr.port(), None)
    }

    /// One SOCKS5 session: CONNECT to `echo.test` is answered with `body`,
    /// any other CONNECT or UDP ASSOCIATE is accepted and closed. With
    /// `password` set only user `user` with that password gets in.
    async fn serve_socks5(
        mut socket: TcpStream,
        body: &str,
        password: Option<&str>,
    ) -> Result<()> {
        let mut head = [0u8; 2];
        socket.read_exact(&mut head).await?;
        let mut methods = vec![0u8; head[1] as usize];
        socket.read_exact(&mut methods).await?;

        match password {
            Some(expected) if methods.contains(&0x02) => {
                socket.write_all(&[0x05, 0x02]).await?;
                let mut ulen = [0u8; 2];
                socket.read_exact(&mut ulen).await?;
                let mut user = vec![0u8; ulen[1] as usize];
                socket.read_exact(&mut user).await?;
                let mut plen = [0u8; 1];
                socket.read_exact(&mut plen).await?;
                let mut pass = vec![0u8; plen[0] as usize];
                socket.read_exact(&mut pass).await?;

                let accepted = user == b"user" && pass == expected.as_bytes();
                socket
                    .write_all(&[0x01, if accepted { 0x00 } else { 0x01 }])
                    .await?;
                if !accepted {
                    return Ok(());
                }
            }
            Some(_) => {
                socket.write_all(&[0x05, 0xFF]).await?;
                return Ok(());
            }
            None => socket.write_all(&[0x05, 0x00]).await?,
        }

        let request = CommandRequest::read_from(&mut socket).await?;
        socket.write_all(&Reply::frame(0x00)).await?;
        if request.command == SOCKS5_CMD_CONNECT
            && request.addr == TargetAddr::Domain("echo.test".to_string())
        {
            answer_echo(&mut socket, body).await?;
        }
        Ok(())
    }

    async fn spawn_socks5_echo(body: &'static str, password: Option<&'static str>) -> Proxy {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve_socks5(socket, body, password));
            }
        });
        Proxy::new(addr.ip().to_string(), addr.port(), None)
    }

    fn socks5_prober(resolver: Arc<dyn GeoResolver>) -> Prober {
        let config = CheckerConfig::new()
            .with_timeout(Duration::from_secs(3))
            .with_capabilities(true)
            .with_echo_url("http://echo.test/get".to_string())
            .with_resolver(resolver);
        Prober::from_config(&config)
    }

    fn with_user(proxy: Proxy, password: &str) -> Proxy {
        Proxy::with_auth(proxy.host, proxy.port, None, "user".to_string(), password.to_string())
    }

    const ALL_CAPABILITIES: ProxyCapabilities = ProxyCapabilities {
        smtp: true,
        pop3: true,
        imap: true,
        udp: true,
    };

    /// Proxy that accepts and immediately hangs up
    async fn spawn_dead_proxy() -> Proxy {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });
        Proxy::new(addr.ip().to_string(), addr.port(), None)
    }

    fn https_prober(resolver: Arc<dyn GeoResolver>) -> Prober {
        let config = CheckerConfig::new()
            .with_probe_kind(ProbeKind::Https)
            .with_timeout(Duration::from_secs(3))
            .with_echo_url("http://echo.test/get".to_string())
            .with_resolver(resolver);
        Prober::from_config(&config)
    }

    #[tokio::test]
    async fn test_http_tunnel_alive_with_geo() {
        let proxy = spawn_echo_proxy(r#"{"origin":"8.8.4.4","headers":{"Host":"echo.test"}}"#).await;
        let resolver = Arc::new(RecordingResolver::default());
        let result = https_prober(resolver.clone()).probe_once(&proxy).await;

        assert!(result.alive);
        assert_eq!(result.status_code, 200);
        assert_eq!(result.ip, "8.8.4.4");
        assert_eq!(result.country, "Germany");
        assert_eq!(result.city, "Berlin");
        assert_eq!(result.anonymity, AnonymityLevel::Elite);
        assert_eq!(result.fraud_score, 70.0);
        assert!(result.error.is_none());
        assert_eq!(*resolver.calls.lock().unwrap(), vec!["8.8.4.4".to_string()]);
    }

    #[tokio::test]
    async fn test_leaky_proxy_is_classified() {
        let proxy = spawn_echo_proxy(
            r#"{"origin":"1.1.1.1, 2.2.2.2","headers":{"X-Forwarded-For":"1.1.1.1"}}"#,
        )
        .await;
        let result = https_prober(Arc::new(NoGeoResolver)).probe_once(&proxy).await;

        assert!(result.alive);
        assert_eq!(result.ip, "1.1.1.1");
        assert_eq!(result.anonymity, AnonymityLevel::Transparent);
        assert_eq!(result.fraud_score, 20.0);
    }

    #[tokio::test]
    async fn test_geo_failure_keeps_result_dead() {
        let proxy = spawn_echo_proxy(r#"{"origin":"8.8.4.4","headers":{"Via":"1.1 squid"}}"#).await;
        let resolver = Arc::new(RecordingResolver {
            fail: true,
            ..Default::default()
        });
        let result = https_prober(resolver).probe_once(&proxy).await;

        assert!(!result.alive);
        assert_eq!(result.anonymity, AnonymityLevel::Anonymous);
        assert_eq!(result.status_code, 0);
        assert!(result.ip.is_empty());
        assert!(result.country.is_empty());
        assert_eq!(result.fraud_score, 0.0);
        assert!(result.error.unwrap().starts_with("geo_error"));
    }

    #[tokio::test]
    async fn test_echo_failure_resolves_empty_origin() {
        let proxy = spawn_dead_proxy().await;
        let resolver = Arc::new(RecordingResolver::default());
        let result = https_prober(resolver.clone()).probe_once(&proxy).await;

        assert!(!result.alive);
        assert_eq!(result.anonymity, AnonymityLevel::Unknown);
        assert!(result.country.is_empty());
        assert!(result.error.unwrap().starts_with("echo_error"));
        assert_eq!(*resolver.calls.lock().unwrap(), vec![String::new()]);
    }

    #[tokio::test]
    async fn test_socks5_unreachable_proxy() {
        let proxy = spawn_dead_proxy().await;
        let config = CheckerConfig::new()
            .with_timeout(Duration::from_secs(2))
            .with_echo_url("http://echo.test/get".to_string());
        let result = Prober::from_config(&config).probe_once(&proxy).await;

        assert!(!result.alive);
        assert!(result.error.is_some());
        assert_eq!(result.capabilities, Default::default());
    }

    #[tokio::test]
    async fn test_socks5_tunnel_alive_with_capabilities() {
        let proxy = spawn_socks5_echo(r#"{"origin":"8.8.4.4","headers":{}}"#, None).await;
        let resolver = Arc::new(RecordingResolver::default());
        let result = socks5_prober(resolver.clone()).probe_once(&proxy).await;

        assert!(result.alive, "error: {:?}", result.error);
        assert_eq!(result.ip, "8.8.4.4");
        assert_eq!(result.country, "Germany");
        assert_eq!(result.anonymity, AnonymityLevel::Elite);
        assert_eq!(result.capabilities, ALL_CAPABILITIES);
        assert_eq!(*resolver.calls.lock().unwrap(), vec!["8.8.4.4".to_string()]);
    }

    #[tokio::test]
    async fn test_socks5_tunnel_with_password() {
        let proxy = spawn_socks5_echo(r#"{"origin":"8.8.4.4","headers":{}}"#, Some("secret")).await;
        let result = socks5_prober(Arc::new(NoGeoResolver))
            .probe_once(&with_user(proxy, "secret"))
            .await;

        assert!(result.alive, "error: {:?}", result.error);
        assert_eq!(result.capabilities, ALL_CAPABILITIES);
    }

    #[tokio::test]
    async fn test_socks5_username_without_password() {
        let proxy = spawn_socks5_echo(r#"{"origin":"8.8.4.4","headers":{}}"#, Some("")).await;
        let result = socks5_prober(Arc::new(NoGeoResolver))
            .probe_once(&with_user(proxy, ""))
            .await;

        assert!(result.alive, "error: {:?}", result.error);
        assert_eq!(result.ip, "8.8.4.4");
        assert_eq!(result.capabilities, ALL_CAPABILITIES);
    }

    #[tokio::test]
    async fn test_socks5_wrong_password_is_dead() {
        let proxy = spawn_socks5_echo(r#"{"origin":"8.8.4.4","headers":{}}"#, Some("secret")).await;
        let result = socks5_prober(Arc::new(NoGeoResolver))
            .probe_once(&with_user(proxy, "nope"))
            .await;

        assert!(!result.alive);
        assert!(result.error.unwrap().starts_with("echo_error"));
        assert_eq!(result.capabilities, ProxyCapabilities::default());
    }

    #[tokio::test]
    async fn test_https_kind_skips_capabilities() {
        let proxy = spawn_echo_proxy(r#"{"origin":"8.8.4.4","headers":{}}"#).await;
        let config = CheckerConfig::new()
            .with_probe_kind(ProbeKind::Https)
            .with_timeout(Duration::from_secs(3))
            .with_capabilities(true)
            .with_echo_url("http://echo.test/get".to_string());
        let result = Prober::from_config(&config).probe_once(&proxy).await;

        assert!(result.alive);
        assert_eq!(result.capabilities, ProxyCapabilities::default());
    }

    #[test]
    fn test_tunnels_build_with_credentials() {
        let proxy = Proxy::with_auth(
            "10.0.0.1".to_string(),
            1080,
            None,
            "us er".to_string(),
            "p@ss".to_string(),
        );
        assert!(http_tunnel(&proxy).is_ok());
        assert!(socks5_tunnel(&proxy).is_ok());
    }

    #[test]
    fn test_authority_brackets_ipv6() {
        let proxy = Proxy::new("::1".to_string(), 1080, None);
        assert_eq!(authority(&proxy), "[::1]:1080");
        let proxy = Proxy::new("example.org".to_string(), 8080, None);
        assert_eq!(authority(&proxy), "example.org:8080");
    }
}
