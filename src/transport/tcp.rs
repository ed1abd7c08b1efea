//! TCP listeners and dialers.

use crate::error::Result;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, instrument};

/// Bind a listener on `addr` (`host:port`; port 0 picks a free port).
#[instrument]
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!(address = %listener.local_addr()?, "Listening on tcp");
    Ok(listener)
}

/// Dial `addr` with Nagle disabled; calls are small and latency bound.
#[instrument]
pub async fn connect(addr: &str) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    debug!(peer = %stream.peer_addr()?, "Connected");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_and_connect() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (dialed, accepted) = tokio::join!(connect(&addr), listener.accept());
        assert!(dialed.is_ok());
        assert!(accepted.is_ok());
    }
}
