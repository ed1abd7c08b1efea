//! Same-host transport over Unix domain sockets.
//!
//! Endpoints are written `unix:/path/to/socket`. Other platforms report a
//! configuration error for local endpoints.

#[cfg(unix)]
use std::path::PathBuf;
use std::path::Path;
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
#[cfg(unix)]
use tracing::{error, info, instrument};

#[cfg(not(unix))]
use crate::error::ProtocolError;
use crate::error::Result;
use crate::transport::{BoxedConnection, Listener};

/// Unix listener that removes its socket file when dropped.
#[cfg(unix)]
pub struct LocalListener {
    listener: UnixListener,
    path: PathBuf,
}

#[cfg(unix)]
impl LocalListener {
    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _) = self.listener.accept().await?;
        Ok(stream)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
impl Drop for LocalListener {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                error!(error = %e, path = %self.path.display(), "Failed to remove socket file");
            } else {
                info!(path = %self.path.display(), "Removed socket file");
            }
        }
    }
}

/// Bind a Unix socket at `path`, replacing a stale socket file.
#[cfg(unix)]
#[instrument(fields(socket_path = %path.display()))]
pub async fn bind(path: &Path) -> Result<Listener> {
    if path.exists() {
        tokio::fs::remove_file(path).await.ok();
    }
    let listener = UnixListener::bind(path)?;
    info!(path = %path.display(), "Listening on unix socket");
    Ok(Listener::Local(LocalListener {
        listener,
        path: path.to_path_buf(),
    }))
}

#[cfg(unix)]
#[instrument(fields(socket_path = %path.display()))]
pub async fn connect(path: &Path) -> Result<BoxedConnection> {
    let stream = UnixStream::connect(path).await?;
    Ok(Box::new(stream))
}

#[cfg(not(unix))]
pub async fn bind(path: &Path) -> Result<Listener> {
    Err(ProtocolError::ConfigError(format!(
        "unix sockets are not available on this platform: {}",
        path.display()
    )))
}

#[cfg(not(unix))]
pub async fn connect(path: &Path) -> Result<BoxedConnection> {
    Err(ProtocolError::ConfigError(format!(
        "unix sockets are not available on this platform: {}",
        path.display()
    )))
}
