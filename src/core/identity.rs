//! Per-pass identity caches.
//!
//! A [`WriteCache`] maps the address of every reference value written during
//! one serialization pass to its 1-based id; a [`ReadCache`] maps ids back to
//! the instances built while decoding. Neither outlives a single pass.

use crate::error::{constants, ProtocolError, Result};
use std::any::Any;
use std::collections::HashMap;

/// Id written for a null reference.
pub const NULL_ID: i32 = 0;

/// Outcome of registering a value with the [`WriteCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Already written in this pass; only the id goes on the wire.
    Existing(i32),
    /// Newly assigned; the id is followed by the payload.
    Assigned(i32),
}

impl Registration {
    pub fn id(self) -> i32 {
        match self {
            Registration::Existing(id) | Registration::Assigned(id) => id,
        }
    }
}

/// Write-side cache: instance address to id.
#[derive(Debug, Default)]
pub struct WriteCache {
    ids: HashMap<usize, i32>,
    count: i32,
}

impl WriteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `identity`, assigning `count + 1` on first sight.
    ///
    /// Values without an observable identity (`None`) always receive a fresh id.
    pub fn register(&mut self, identity: Option<usize>) -> Result<Registration> {
        if let Some(address) = identity {
            if let Some(&id) = self.ids.get(&address) {
                return Ok(Registration::Existing(id));
            }
        }
        let id = self
            .count
            .checked_add(1)
            .ok_or_else(|| ProtocolError::InvalidArgument("too many references in one graph".into()))?;
        self.count = id;
        if let Some(address) = identity {
            self.ids.insert(address, id);
        }
        Ok(Registration::Assigned(id))
    }

    /// Number of ids handed out so far.
    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Read-side cache: id to decoded instance.
#[derive(Default)]
pub struct ReadCache {
    entries: HashMap<i32, Box<dyn Any + Send>>,
}

impl ReadCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly allocated shell under `id`.
    pub fn insert<T: Any + Send>(&mut self, id: i32, value: T) {
        self.entries.insert(id, Box::new(value));
    }

    /// Fetch a clone of the instance stored under `id`.
    ///
    /// # Errors
    /// `DataIntegrity` when the id refers to an instance of another type.
    pub fn get<T: Any + Clone>(&self, id: i32) -> Result<Option<T>> {
        match self.entries.get(&id) {
            None => Ok(None),
            Some(entry) => entry.downcast_ref::<T>().cloned().map(Some).ok_or_else(|| {
                ProtocolError::DataIntegrity(format!(
                    "{} (id {id})",
                    constants::ERR_CACHED_TYPE_MISMATCH
                ))
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
