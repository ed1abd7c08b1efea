//! # Server
//!
//! Accepts connections, reads each one's session key and binds the stream to
//! a server-role [`DataChannel`]: a fresh one for an unknown key (after the
//! bootstrap closure exports the id-0 service), or the stored one when a
//! client reconnects within the grace period.
//!
//! ```rust,no_run
//! use objwire::config::NetworkConfig;
//! use objwire::service::server::Server;
//! use std::sync::Arc;
//!
//! # async fn run() -> objwire::error::Result<()> {
//! let server = Arc::new(Server::new(NetworkConfig::default(), |_channel| {
//!     // channel.export(...) the bootstrap service here
//!     Ok(())
//! }));
//! server.run().await
//! # }
//! ```

use crate::config::NetworkConfig;
use crate::core::serialization::Serializer;
use crate::error::Result;
use crate::protocol::handshake::{AccessControl, AllowAll};
use crate::service::channel::{DataChannel, Role};
use crate::transport::session_cache::SessionCache;
use crate::transport::{read_session_key, Connection, Endpoint, Listener};
use crate::utils::timeout::with_timeout_error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

type BootstrapFn = dyn Fn(&DataChannel) -> Result<()> + Send + Sync;

/// Session-aware channel server.
pub struct Server {
    config: NetworkConfig,
    serializer: Serializer,
    access: Arc<dyn AccessControl>,
    bootstrap: Box<BootstrapFn>,
    sessions: SessionCache,
}

impl Server {
    /// `bootstrap` runs once per new session, before its stream is attached.
    pub fn new<F>(config: NetworkConfig, bootstrap: F) -> Self
    where
        F: Fn(&DataChannel) -> Result<()> + Send + Sync + 'static,
    {
        let sessions = SessionCache::new(
            config.server.max_sessions,
            config.server.session_grace_period,
        );
        Self {
            config,
            serializer: Serializer::new(),
            access: Arc::new(AllowAll),
            bootstrap: Box::new(bootstrap),
            sessions,
        }
    }

    pub fn with_access_control(mut self, access: Arc<dyn AccessControl>) -> Self {
        self.access = access;
        self
    }

    /// Serializer shared by every session, so member plans are built once.
    pub fn with_serializer(mut self, serializer: Serializer) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<Listener> {
        self.config.server.address.parse::<Endpoint>()?.bind().await
    }

    /// Serve the configured address until Ctrl-C.
    #[instrument(skip(self), fields(address = %self.config.server.address))]
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = self.bind().await?;
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received CTRL+C signal, shutting down");
                let _ = shutdown_tx.send(()).await;
            }
        });

        self.run_with_shutdown(listener, shutdown_rx).await
    }

    /// Serve `listener` until a message (or sender drop) on `shutdown_rx`.
    pub async fn run_with_shutdown(
        self: Arc<Self>,
        listener: Listener,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<()> {
        let mut eviction = tokio::time::interval(self.config.server.eviction_interval);
        eviction.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down server. Waiting for sessions to detach...");
                    self.shutdown().await;
                    return Ok(());
                }

                _ = eviction.tick() => {
                    let evicted = self.sessions.evict_expired().await;
                    if evicted > 0 {
                        info!(evicted, "Expired sessions closed");
                    }
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            let server = Arc::clone(&self);
                            tokio::spawn(async move {
                                if let Err(e) = server.accept_stream(stream).await {
                                    warn!(peer = %peer, error = %e, "Connection rejected");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Error accepting connection");
                        }
                    }
                }
            }
        }
    }

    /// Bind one accepted stream to its session.
    #[instrument(skip(self, stream))]
    pub async fn accept_stream<S: Connection>(&self, mut stream: S) -> Result<DataChannel> {
        let key = with_timeout_error(
            read_session_key(&mut stream),
            self.config.server.handshake_timeout,
        )
        .await?;
        let session = short_key(&key);

        if let Some(channel) = self.sessions.get(&key).await {
            channel.attach(stream).await?;
            info!(session, "Session resumed");
            return Ok(channel);
        }

        let channel = DataChannel::builder(Role::Server)
            .config(self.config.channel.clone())
            .serializer(self.serializer.clone())
            .access_control(Arc::clone(&self.access))
            .build()?;
        (self.bootstrap)(&channel)?;
        self.sessions.insert(key.clone(), channel.clone()).await?;
        channel.attach(stream).await?;
        info!(session, "Session started");
        Ok(channel)
    }

    /// Wait up to the shutdown timeout for sessions to detach, then close all.
    pub async fn shutdown(&self) {
        let deadline = tokio::time::sleep(self.config.server.shutdown_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!("Shutdown timeout reached, closing live sessions");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => {
                    if self.sessions.all_detached().await {
                        debug!("All sessions detached");
                        break;
                    }
                }
            }
        }

        let channels = self.sessions.drain().await;
        let count = channels.len();
        for channel in channels {
            channel.close().await;
        }
        info!(closed = count, "Server stopped");
    }
}

/// Leading characters of a session key, enough to correlate log lines.
fn short_key(key: &str) -> &str {
    let end = key
        .char_indices()
        .nth(8)
        .map_or(key.len(), |(index, _)| index);
    &key[..end]
}
