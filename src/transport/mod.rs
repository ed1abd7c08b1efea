//! # Transport Layer
//!
//! Byte-stream plumbing beneath the data channel.
//!
//! ## Components
//! - **TCP**: listeners and dialers for network peers
//! - **Local**: Unix domain sockets for same-host peers
//! - **Session Cache**: server-side channels kept for resumption by session key
//! - **Directory**: service name to endpoint lookup for clients
//!
//! ## Session Preamble
//! ```text
//! [KeyLength(4)] [Key(N), UTF-8, N <= 256]
//! ```
//! The first bytes on every physical connection; the server resumes the
//! channel stored under the key, or creates a new one.

pub mod directory;
pub mod local;
pub mod session_cache;
pub mod tcp;

use crate::config::MAX_SESSION_KEY_LEN;
use crate::error::{constants, ProtocolError, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Any duplex stream a channel can run over.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedConnection = Box<dyn Connection>;

/// Where a server listens or a client dials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `host:port`, optionally written as `tcp://host:port`
    Tcp(String),
    /// `unix:/path/to/socket`
    Local(PathBuf),
}

impl Endpoint {
    pub async fn connect(&self) -> Result<BoxedConnection> {
        match self {
            Endpoint::Tcp(addr) => Ok(Box::new(tcp::connect(addr).await?)),
            Endpoint::Local(path) => local::connect(path).await,
        }
    }

    pub async fn bind(&self) -> Result<Listener> {
        match self {
            Endpoint::Tcp(addr) => Ok(Listener::Tcp(tcp::bind(addr).await?)),
            Endpoint::Local(path) => local::bind(path).await,
        }
    }
}

impl FromStr for Endpoint {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(ProtocolError::ConfigError("empty socket path".into()));
            }
            return Ok(Endpoint::Local(PathBuf::from(path)));
        }
        let addr = s.strip_prefix("tcp://").unwrap_or(s);
        match addr.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Endpoint::Tcp(addr.to_string()))
            }
            _ => Err(ProtocolError::ConfigError(format!(
                "endpoint '{s}' must be host:port or unix:/path"
            ))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => f.write_str(addr),
            Endpoint::Local(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// A bound listener of either kind.
pub enum Listener {
    Tcp(tokio::net::TcpListener),
    #[cfg(unix)]
    Local(local::LocalListener),
}

impl Listener {
    /// Next inbound connection and a printable peer name.
    pub async fn accept(&self) -> Result<(BoxedConnection, String)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok((Box::new(stream), peer.to_string()))
            }
            #[cfg(unix)]
            Listener::Local(listener) => {
                let stream = listener.accept().await?;
                Ok((Box::new(stream), "local".to_string()))
            }
        }
    }

    /// The endpoint clients should dial, with the actual port for `:0` binds.
    pub fn local_endpoint(&self) -> Result<Endpoint> {
        match self {
            Listener::Tcp(listener) => Ok(Endpoint::Tcp(listener.local_addr()?.to_string())),
            #[cfg(unix)]
            Listener::Local(listener) => Ok(Endpoint::Local(listener.path().to_path_buf())),
        }
    }
}

/// Send the session preamble.
pub async fn write_session_key<S: AsyncWrite + Unpin>(stream: &mut S, key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_SESSION_KEY_LEN {
        return Err(ProtocolError::InvalidArgument(format!(
            "{}: length {}",
            constants::ERR_SESSION_KEY,
            key.len()
        )));
    }
    let mut preamble = Vec::with_capacity(4 + key.len());
    preamble.extend_from_slice(&(key.len() as i32).to_le_bytes());
    preamble.extend_from_slice(key.as_bytes());
    stream.write_all(&preamble).await?;
    stream.flush().await?;
    Ok(())
}

/// Read the session preamble, rejecting empty, oversized or non-UTF-8 keys.
pub async fn read_session_key<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String> {
    let len = stream.read_i32_le().await?;
    if len < 1 || len as usize > MAX_SESSION_KEY_LEN {
        return Err(ProtocolError::AuthenticationError(format!(
            "{}: length {len}",
            constants::ERR_SESSION_KEY
        )));
    }
    let mut key = vec![0u8; len as usize];
    stream.read_exact(&mut key).await?;
    String::from_utf8(key).map_err(|_| {
        ProtocolError::AuthenticationError(format!("{}: not UTF-8", constants::ERR_SESSION_KEY))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parsing() {
        assert_eq!(
            "127.0.0.1:7000".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp("127.0.0.1:7000".into())
        );
        assert_eq!(
            "tcp://localhost:80".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp("localhost:80".into())
        );
        assert_eq!(
            "unix:/tmp/objwire.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Local(PathBuf::from("/tmp/objwire.sock"))
        );
        assert!("no-port".parse::<Endpoint>().is_err());
        assert!("not:a:valid:address".parse::<Endpoint>().is_err());
        assert!(":80".parse::<Endpoint>().is_err());
        assert!("unix:".parse::<Endpoint>().is_err());
    }

    #[tokio::test]
    async fn test_session_key_preamble() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_session_key(&mut a, "k-123").await.unwrap();
        assert_eq!(read_session_key(&mut b).await.unwrap(), "k-123");

        assert!(write_session_key(&mut a, "").await.is_err());
        assert!(write_session_key(&mut a, &"x".repeat(257)).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_key_rejected() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_all(&1000i32.to_le_bytes()).await.unwrap();
        assert!(matches!(
            read_session_key(&mut b).await,
            Err(ProtocolError::AuthenticationError(_))
        ));
    }
}
