//! Channel-level handshake.
//!
//! Calls addressed to object id [`CHANNEL_OBJECT_ID`] are handled by the
//! channel itself rather than an exported service. After attaching, a client
//! verifies that the server's bootstrap service implements the interface it
//! expects, then presents its client id for access control. A server channel
//! configured to require the handshake rejects application calls until both
//! steps have succeeded.
//!
//! **Per-Attachment State**
//! Verification state lives in a [`ServerHandshake`] owned by each server
//! channel and is reset whenever a new stream is attached, so a resumed
//! session must verify again.

use crate::error::{constants, ProtocolError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, instrument, warn};

/// Object id addressing the channel itself.
pub const CHANNEL_OBJECT_ID: i16 = -1;

/// Object id of the bootstrap service.
pub const BOOTSTRAP_OBJECT_ID: i16 = 0;

/// Method ids at or above this value are reserved for the channel.
pub const RESERVED_METHOD_BASE: i16 = 900;

pub const PING: i16 = 900;
pub const VERIFY_INTERFACE: i16 = 901;
pub const VERIFY_ACCESS_TOKEN: i16 = 902;

/// Decides whether a client may use a service.
pub trait AccessControl: Send + Sync {
    fn is_allowed(&self, client_id: &str, service_name: &str) -> bool;
}

/// Accepts every client.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn is_allowed(&self, _client_id: &str, _service_name: &str) -> bool {
        true
    }
}

impl<F> AccessControl for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn is_allowed(&self, client_id: &str, service_name: &str) -> bool {
        self(client_id, service_name)
    }
}

/// Server-side verification state for one attachment.
#[derive(Debug, Default)]
pub struct ServerHandshake {
    interface_verified: AtomicBool,
    access_granted: AtomicBool,
    client_id: Mutex<Option<String>>,
}

impl ServerHandshake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Both steps done.
    pub fn is_complete(&self) -> bool {
        self.interface_verified.load(Ordering::Acquire) && self.access_granted.load(Ordering::Acquire)
    }

    /// Client id accepted by the last successful access check.
    pub fn client_id(&self) -> Option<String> {
        self.client_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset(&self) {
        self.interface_verified.store(false, Ordering::Release);
        self.access_granted.store(false, Ordering::Release);
        *self.client_id.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Compare the interface a client expects with the bootstrap service's.
    #[instrument(skip(self))]
    pub fn verify_interface(&self, requested: &str, exported: Option<&str>) -> Result<()> {
        let exported = exported
            .ok_or_else(|| ProtocolError::AuthenticationError(constants::ERR_NO_BOOTSTRAP.into()))?;
        if requested != exported {
            warn!(requested, exported, "Interface mismatch");
            return Err(ProtocolError::AuthenticationError(format!(
                "interface mismatch: server exports {exported}, client expects {requested}"
            )));
        }
        self.interface_verified.store(true, Ordering::Release);
        debug!("Interface verified");
        Ok(())
    }

    /// Ask `access` whether `client_id` may use the bootstrap service.
    #[instrument(skip(self, access))]
    pub fn verify_access(
        &self,
        client_id: &str,
        exported: Option<&str>,
        access: &dyn AccessControl,
    ) -> Result<()> {
        let service = exported
            .ok_or_else(|| ProtocolError::AuthenticationError(constants::ERR_NO_BOOTSTRAP.into()))?;
        if !access.is_allowed(client_id, service) {
            warn!(client_id, service, "Access denied");
            return Err(ProtocolError::AuthenticationError(format!(
                "{}: {client_id}",
                constants::ERR_ACCESS_DENIED
            )));
        }
        *self.client_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(client_id.to_string());
        self.access_granted.store(true, Ordering::Release);
        debug!("Access granted");
        Ok(())
    }

    /// Gate for application calls.
    pub fn require_complete(&self) -> Result<()> {
        if self.is_complete() {
            Ok(())
        } else {
            Err(ProtocolError::AuthenticationError(
                constants::ERR_NOT_AUTHENTICATED.into(),
            ))
        }
    }
}

/// Map a failed handshake call to an authentication error on the client.
pub fn client_failure(err: ProtocolError) -> ProtocolError {
    match err {
        ProtocolError::RemoteCall(text) => ProtocolError::AuthenticationError(text),
        other => other,
    }
}
