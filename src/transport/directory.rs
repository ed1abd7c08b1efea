//! Service name to endpoint lookup.
//!
//! Clients that know a service only by name ask a [`ServiceDirectory`] for
//! its endpoints and dial them in order until one answers.

use crate::error::{ProtocolError, Result};
use crate::transport::Endpoint;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Resolves a service name to the endpoints hosting it.
pub trait ServiceDirectory: Send + Sync {
    /// Endpoints for `service`, preferred first.
    ///
    /// # Errors
    /// Implementations report unknown services as `ConfigError`.
    fn resolve(&self, service: &str) -> Result<Vec<Endpoint>>;
}

/// In-memory directory, typically filled from configuration.
///
/// Uses `&self` for registration so it can be shared behind an `Arc`.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    entries: RwLock<HashMap<String, Vec<Endpoint>>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(self, service: impl Into<String>, endpoints: Vec<Endpoint>) -> Self {
        self.register(service, endpoints);
        self
    }

    /// Replace the endpoints of `service`.
    pub fn register(&self, service: impl Into<String>, endpoints: Vec<Endpoint>) {
        let service = service.into();
        debug!(service = %service, endpoints = endpoints.len(), "Service registered");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(service, endpoints);
    }

    /// Idempotent.
    pub fn unregister(&self, service: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(service)
            .is_some()
    }
}

impl ServiceDirectory for StaticDirectory {
    fn resolve(&self, service: &str) -> Result<Vec<Endpoint>> {
        match self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service)
        {
            Some(endpoints) if !endpoints.is_empty() => Ok(endpoints.clone()),
            _ => Err(ProtocolError::ConfigError(format!(
                "no endpoints registered for service '{service}'"
            ))),
        }
    }
}
