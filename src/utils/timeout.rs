//! Timeout constants and helpers.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Default deadline for connection-level operations (dial, session key, handshake).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default deadline for one remote call.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval between client heartbeat pings.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// How long a server waits for sessions to detach before closing them.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a detached server session stays resumable.
pub const SESSION_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Await `future`, mapping an elapsed deadline to [`ProtocolError::Timeout`].
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}
