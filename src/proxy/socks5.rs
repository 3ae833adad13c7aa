//! SOCKS5 frames (RFC 1928, RFC 1929) and the client handshake
//!
//! The client side covers greeting, optional username/password
//! sub-negotiation, one command (CONNECT or UDP ASSOCIATE) and its reply.
//! The few server-side readers exist for the local relay in
//! [`crate::proxy::relay`]. Every read uses `read_exact`, so a short or
//! truncated frame surfaces as an error instead of an out-of-bounds index.

use crate::proxy::models::{Proxy, ProxyAuth};
use crate::Result;
use anyhow::{anyhow, bail, Context};
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

pub const SOCKS5_VERSION: u8 = 0x05;
pub const SOCKS5_RESERVED: u8 = 0x00;

pub const SOCKS5_CMD_CONNECT: u8 = 0x01;
pub const SOCKS5_CMD_UDP_ASSOCIATE: u8 = 0x03;

pub const SOCKS5_ADDR_IPV4: u8 = 0x01;
pub const SOCKS5_ADDR_DOMAIN: u8 = 0x03;
pub const SOCKS5_ADDR_IPV6: u8 = 0x04;

pub const SOCKS5_AUTH_NONE: u8 = 0x00;
pub const SOCKS5_AUTH_USERPASS: u8 = 0x02;
pub const SOCKS5_AUTH_UNACCEPTABLE: u8 = 0xFF;

pub const SOCKS5_REPLY_SUCCESS: u8 = 0x00;
pub const SOCKS5_REPLY_GENERAL_FAILURE: u8 = 0x01;
pub const SOCKS5_REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;

pub const SOCKS5_USERPASS_VERSION: u8 = 0x01;
pub const SOCKS5_USERPASS_SUCCESS: u8 = 0x00;

/// Destination carried in a command frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Domain(String),
}

impl TargetAddr {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            TargetAddr::Ipv4(ip) => {
                buf.push(SOCKS5_ADDR_IPV4);
                buf.extend_from_slice(&ip.octets());
            }
            TargetAddr::Ipv6(ip) => {
                buf.push(SOCKS5_ADDR_IPV6);
                buf.extend_from_slice(&ip.octets());
            }
            TargetAddr::Domain(domain) => {
                let len = u8::try_from(domain.len())
                    .ok()
                    .filter(|len| *len > 0)
                    .ok_or_else(|| anyhow!("invalid domain length {}", domain.len()))?;
                buf.push(SOCKS5_ADDR_DOMAIN);
                buf.push(len);
                buf.extend_from_slice(domain.as_bytes());
            }
        }
        Ok(())
    }

    /// Read `DST.ADDR` for an already consumed `atyp` byte
    pub async fn read_from<R>(reader: &mut R, atyp: u8) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        match atyp {
            SOCKS5_ADDR_IPV4 => {
                let mut octets = [0u8; 4];
                reader.read_exact(&mut octets).await?;
                Ok(TargetAddr::Ipv4(Ipv4Addr::from(octets)))
            }
            SOCKS5_ADDR_IPV6 => {
                let mut octets = [0u8; 16];
                reader.read_exact(&mut octets).await?;
                Ok(TargetAddr::Ipv6(Ipv6Addr::from(octets)))
            }
            SOCKS5_ADDR_DOMAIN => {
                let mut len = [0u8; 1];
                reader.read_exact(&mut len).await?;
                let mut name = vec![0u8; len[0] as usize];
                reader.read_exact(&mut name).await?;
                String::from_utf8(name)
                    .map(TargetAddr::Domain)
                    .context("domain is not valid utf-8")
            }
            other => bail!("unsupported address type {:#04x}", other),
        }
    }
}

/// `VER NMETHODS METHODS...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub methods: Vec<u8>,
}

impl Greeting {
    /// No-auth is always offered; username/password only with credentials.
    pub fn for_credentials(auth: Option<&ProxyAuth>) -> Self {
        let mut methods = vec![SOCKS5_AUTH_NONE];
        if auth.is_some_and(|a| !a.is_empty()) {
            methods.push(SOCKS5_AUTH_USERPASS);
        }
        Self { methods }
    }

    /// Server side: read the client's offer
    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut head = [0u8; 2];
        reader
            .read_exact(&mut head)
            .await
            .context("failed to read greeting")?;
        if head[0] != SOCKS5_VERSION {
            bail!("unexpected greeting version {:#04x}", head[0]);
        }
        let mut methods = vec![0u8; head[1] as usize];
        reader.read_exact(&mut methods).await?;
        Ok(Self { methods })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + self.methods.len());
        buf.push(SOCKS5_VERSION);
        buf.push(self.methods.len() as u8);
        buf.extend_from_slice(&self.methods);
        buf
    }
}

/// `VER METHOD` chosen by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSelection {
    pub version: u8,
    pub method: u8,
}

impl MethodSelection {
    pub fn decode(buf: [u8; 2]) -> Self {
        Self {
            version: buf[0],
            method: buf[1],
        }
    }

    /// Reject anything but SOCKS5 choosing one of the offered methods
    pub fn validate(&self, offered: &Greeting) -> Result<u8> {
        if self.version != SOCKS5_VERSION {
            bail!("unexpected greeting version {:#04x}", self.version);
        }
        if self.method == SOCKS5_AUTH_UNACCEPTABLE || !offered.methods.contains(&self.method) {
            bail!("server chose unoffered method {:#04x}", self.method);
        }
        Ok(self.method)
    }
}

/// RFC 1929 `VER ULEN UNAME PLEN PASSWD`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPassRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

impl UserPassRequest<'_> {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let ulen = u8::try_from(self.username.len())
            .map_err(|_| anyhow!("username too long for socks5 auth"))?;
        let plen = u8::try_from(self.password.len())
            .map_err(|_| anyhow!("password too long for socks5 auth"))?;

        let mut buf = Vec::with_capacity(3 + self.username.len() + self.password.len());
        buf.push(SOCKS5_USERPASS_VERSION);
        buf.push(ulen);
        buf.extend_from_slice(self.username.as_bytes());
        buf.push(plen);
        buf.extend_from_slice(self.password.as_bytes());
        Ok(buf)
    }
}

/// `VER CMD RSV ATYP DST.ADDR DST.PORT`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: u8,
    pub addr: TargetAddr,
    pub port: u16,
}

impl CommandRequest {
    pub fn connect(addr: TargetAddr, port: u16) -> Self {
        Self {
            command: SOCKS5_CMD_CONNECT,
            addr,
            port,
        }
    }

    /// UDP ASSOCIATE for 0.0.0.0:0, i.e. "any client address"
    pub fn udp_associate() -> Self {
        Self {
            command: SOCKS5_CMD_UDP_ASSOCIATE,
            addr: TargetAddr::Ipv4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }

    /// Server side: read `VER CMD RSV ATYP DST.ADDR DST.PORT`
    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut head = [0u8; 4];
        reader
            .read_exact(&mut head)
            .await
            .context("failed to read command")?;
        if head[0] != SOCKS5_VERSION {
            bail!("unexpected command version {:#04x}", head[0]);
        }
        let addr = TargetAddr::read_from(reader, head[3]).await?;
        let mut port = [0u8; 2];
        reader.read_exact(&mut port).await?;
        Ok(Self {
            command: head[1],
            addr,
            port: u16::from_be_bytes(port),
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = vec![SOCKS5_VERSION, self.command, SOCKS5_RESERVED];
        self.addr.encode_into(&mut buf)?;
        buf.extend_from_slice(&self.port.to_be_bytes());
        Ok(buf)
    }
}

/// First two bytes of the command reply. The bound address that follows is
/// read and discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub version: u8,
    pub code: u8,
}

impl Reply {
    /// Full reply frame with an unspecified IPv4 bound address
    pub fn frame(code: u8) -> [u8; 10] {
        [
            SOCKS5_VERSION,
            code,
            SOCKS5_RESERVED,
            SOCKS5_ADDR_IPV4,
            0,
            0,
            0,
            0,
            0,
            0,
        ]
    }

    pub fn decode(buf: [u8; 2]) -> Self {
        Self {
            version: buf[0],
            code: buf[1],
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != SOCKS5_VERSION {
            bail!("unexpected reply version {:#04x}", self.version);
        }
        if self.code != SOCKS5_REPLY_SUCCESS {
            bail!("command rejected with reply code {:#04x}", self.code);
        }
        Ok(())
    }
}

/// Handshake states, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Greeting,
    Auth,
    Command,
    Reply,
    Done,
}

/// Drives one SOCKS5 negotiation over an already connected stream.
pub struct Socks5Handshake<'a, S> {
    stream: &'a mut S,
    auth: Option<&'a ProxyAuth>,
}

impl<'a, S> Socks5Handshake<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: &'a mut S, auth: Option<&'a ProxyAuth>) -> Self {
        Self { stream, auth }
    }

    /// Run greeting, optional auth and `request`, succeeding only on a zero
    /// reply code.
    pub async fn run(mut self, request: &CommandRequest) -> Result<()> {
        let greeting = Greeting::for_credentials(self.auth);
        let mut state = State::Greeting;

        loop {
            state = match state {
                State::Greeting => {
                    let method = self.negotiate_method(&greeting).await?;
                    if method == SOCKS5_AUTH_USERPASS {
                        State::Auth
                    } else {
                        State::Command
                    }
                }
                State::Auth => {
                    self.authenticate().await?;
                    State::Command
                }
                State::Command => {
                    let frame = request.encode()?;
                    self.stream
                        .write_all(&frame)
                        .await
                        .context("failed to send command")?;
                    State::Reply
                }
                State::Reply => {
                    self.read_reply().await?;
                    State::Done
                }
                State::Done => return Ok(()),
            };
        }
    }

    async fn negotiate_method(&mut self, greeting: &Greeting) -> Result<u8> {
        self.stream
            .write_all(&greeting.encode())
            .await
            .context("failed to send greeting")?;

        let mut buf = [0u8; 2];
        self.stream
            .read_exact(&mut buf)
            .await
            .context("failed to read method selection")?;

        MethodSelection::decode(buf).validate(greeting)
    }

    async fn authenticate(&mut self) -> Result<()> {
        let auth = self
            .auth
            .ok_or_else(|| anyhow!("server requested credentials but none were given"))?;
        let frame = UserPassRequest {
            username: &auth.username,
            password: &auth.password,
        }
        .encode()?;

        self.stream
            .write_all(&frame)
            .await
            .context("failed to send credentials")?;

        let mut buf = [0u8; 2];
        self.stream
            .read_exact(&mut buf)
            .await
            .context("failed to read auth status")?;

        if buf[0] != SOCKS5_USERPASS_VERSION {
            bail!("unexpected auth version {:#04x}", buf[0]);
        }
        if buf[1] != SOCKS5_USERPASS_SUCCESS {
            bail!("authentication rejected with status {:#04x}", buf[1]);
        }
        Ok(())
    }

    /// Leaves the stream positioned after `BND.PORT`, so a CONNECT can be
    /// used as a tunnel afterwards.
    async fn read_reply(&mut self) -> Result<()> {
        let mut buf = [0u8; 2];
        self.stream
            .read_exact(&mut buf)
            .await
            .context("failed to read command reply")?;
        Reply::decode(buf).validate()?;

        let mut bound = [0u8; 2];
        self.stream
            .read_exact(&mut bound)
            .await
            .context("failed to read bound address")?;
        TargetAddr::read_from(&mut *self.stream, bound[1])
            .await
            .context("failed to read bound address")?;
        let mut port = [0u8; 2];
        self.stream
            .read_exact(&mut port)
            .await
            .context("failed to read bound port")?;
        Ok(())
    }
}

/// Dial `proxy` and run `request` through it. On success the returned stream
/// carries the command's payload (the tunnel, for CONNECT).
pub async fn connect_via(proxy: &Proxy, request: &CommandRequest) -> Result<TcpStream> {
    let mut stream = TcpStream::connect((proxy.host.as_str(), proxy.port))
        .await
        .context("failed to connect to proxy")?;
    Socks5Handshake::new(&mut stream, proxy.credentials())
        .run(request)
        .await?;
    Ok(stream)
}
