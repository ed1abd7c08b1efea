//! # Client
//!
//! Dials a server, establishes a session and keeps it alive.
//!
//! A client picks a random session key once and sends it first on every
//! physical connection. When the link is lost a supervisor task redials with
//! the same key and repeats the handshake, so the server resumes the same
//! session and proxies held by the application keep working.
//!
//! ```rust,no_run
//! use objwire::config::NetworkConfig;
//! use objwire::protocol::interface::InterfaceDescriptor;
//! use objwire::service::client::Client;
//! use std::sync::Arc;
//!
//! # async fn run() -> objwire::error::Result<()> {
//! let greeter = Arc::new(InterfaceDescriptor::builder("IGreeter").method("SayHello").build()?);
//! let client = Client::connect(&NetworkConfig::default(), greeter).await?;
//! let reply: String = client.bootstrap()?.call("SayHello", ("World!".to_string(),)).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::{ClientConfig, NetworkConfig};
use crate::core::serialization::Serializer;
use crate::error::{ProtocolError, Result};
use crate::protocol::interface::InterfaceDescriptor;
use crate::service::channel::{DataChannel, LinkState, Role};
use crate::service::proxy::Proxy;
use crate::transport::directory::ServiceDirectory;
use crate::transport::{write_session_key, BoxedConnection, Endpoint};
use crate::utils::timeout::with_timeout_error;
use rand::distr::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Length of generated session keys.
pub const SESSION_KEY_LEN: usize = 32;

/// Random alphanumeric session key.
pub fn generate_session_key() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_KEY_LEN)
        .map(char::from)
        .collect()
}

/// Everything needed to (re)establish the session.
struct Dialer {
    endpoints: Vec<Endpoint>,
    session_key: String,
    config: ClientConfig,
    interface_name: String,
}

impl Dialer {
    async fn dial(&self) -> Result<BoxedConnection> {
        let mut last_error = None;
        for endpoint in &self.endpoints {
            match with_timeout_error(endpoint.connect(), self.config.connection_timeout).await {
                Ok(mut stream) => {
                    write_session_key(&mut stream, &self.session_key).await?;
                    debug!(endpoint = %endpoint, "Dialed");
                    return Ok(stream);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "Dial failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ProtocolError::ConfigError("no endpoints to dial".into())))
    }

    async fn establish(&self, channel: &DataChannel) -> Result<()> {
        let stream = self.dial().await?;
        channel.attach(stream).await?;
        channel
            .handshake(&self.interface_name, &self.config.client_id)
            .await
    }

    /// Up to `max_reconnect_attempts` tries, `reconnect_delay` apart.
    async fn redial(&self, channel: &DataChannel) -> Result<()> {
        let attempts = self.config.max_reconnect_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            tokio::time::sleep(self.config.reconnect_delay).await;
            if channel.is_closed() {
                return Err(ProtocolError::ConnectionClosed);
            }
            match self.establish(channel).await {
                Ok(()) => {
                    info!(attempt, "Reconnected");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Reconnect attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(ProtocolError::ConnectionClosed))
    }
}

/// Client end of one session.
pub struct Client {
    channel: DataChannel,
    interface: Arc<InterfaceDescriptor>,
    dialer: Arc<Dialer>,
    supervisor: JoinHandle<()>,
    heartbeat: Option<JoinHandle<()>>,
}

impl Client {
    /// Dial the configured address and open a session whose bootstrap
    /// object implements `interface`.
    pub async fn connect(config: &NetworkConfig, interface: Arc<InterfaceDescriptor>) -> Result<Self> {
        let endpoint = config.client.address.parse::<Endpoint>()?;
        Self::connect_to(vec![endpoint], config, Serializer::new(), interface).await
    }

    /// Look the service up by its interface name and dial its endpoints in order.
    pub async fn connect_via(
        directory: &dyn ServiceDirectory,
        config: &NetworkConfig,
        interface: Arc<InterfaceDescriptor>,
    ) -> Result<Self> {
        let endpoints = directory.resolve(interface.name())?;
        Self::connect_to(endpoints, config, Serializer::new(), interface).await
    }

    /// Dial `endpoints` in order with an explicit serializer.
    #[instrument(skip_all, fields(interface = %interface.name()))]
    pub async fn connect_to(
        endpoints: Vec<Endpoint>,
        config: &NetworkConfig,
        serializer: Serializer,
        interface: Arc<InterfaceDescriptor>,
    ) -> Result<Self> {
        let channel = DataChannel::builder(Role::Client)
            .config(config.channel.clone())
            .serializer(serializer)
            .build()?;
        let dialer = Arc::new(Dialer {
            endpoints,
            session_key: generate_session_key(),
            config: config.client.clone(),
            interface_name: interface.name().to_string(),
        });

        if let Err(e) = dialer.establish(&channel).await {
            channel.close().await;
            return Err(e);
        }
        info!("Session established");

        let supervisor = tokio::spawn(supervise(channel.clone(), Arc::clone(&dialer)));
        let heartbeat = config
            .client
            .heartbeat_enabled
            .then(|| tokio::spawn(heartbeat(channel.clone(), config.client.heartbeat_interval)));

        Ok(Self {
            channel,
            interface,
            dialer,
            supervisor,
            heartbeat,
        })
    }

    pub fn channel(&self) -> &DataChannel {
        &self.channel
    }

    pub fn session_key(&self) -> &str {
        &self.dialer.session_key
    }

    /// Proxy for the server's bootstrap object.
    pub fn bootstrap(&self) -> Result<Proxy> {
        self.channel.bootstrap_proxy(Arc::clone(&self.interface))
    }

    /// Redial now with the same session key, replacing the current stream.
    pub async fn reconnect(&self) -> Result<()> {
        self.dialer.establish(&self.channel).await
    }

    pub async fn close(&self) {
        self.supervisor.abort();
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.abort();
        }
        self.channel.close().await;
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.supervisor.abort();
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.abort();
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("interface", &self.interface.name())
            .field("channel", &self.channel)
            .finish()
    }
}

async fn supervise(channel: DataChannel, dialer: Arc<Dialer>) {
    let mut link = channel.watch_link();
    loop {
        if link.changed().await.is_err() {
            return;
        }
        let state = *link.borrow_and_update();
        match state {
            LinkState::Closed => return,
            LinkState::Lost if dialer.config.auto_reconnect => {
                if let Err(e) = dialer.redial(&channel).await {
                    error!(error = %e, "Giving up on reconnecting");
                }
            }
            _ => {}
        }
    }
}

async fn heartbeat(channel: DataChannel, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match channel.link_state() {
            LinkState::Closed => return,
            LinkState::Attached => {
                if let Err(e) = channel.ping().await {
                    debug!(error = %e, "Heartbeat failed");
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_keys_are_random() {
        let a = generate_session_key();
        let b = generate_session_key();
        assert_eq!(a.len(), SESSION_KEY_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_connect_fails_without_server() {
        let mut config = NetworkConfig::default();
        config.client.connection_timeout = std::time::Duration::from_millis(200);
        let interface = Arc::new(InterfaceDescriptor::builder("IGreeter").method("SayHello").build().unwrap());
        let result = Client::connect_to(
            vec![Endpoint::Tcp("127.0.0.1:1".into())],
            &config,
            Serializer::new(),
            interface,
        )
        .await;
        assert!(result.is_err());
    }
}
