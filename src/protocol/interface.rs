//! # Interfaces
//!
//! An [`InterfaceDescriptor`] names a remotable contract and assigns the
//! numeric method ids both peers use on the wire: methods sorted by name take
//! `0, 1, ...`, then events sorted by name each take two adjacent ids (add,
//! remove). Events are identified in Event blocks by their add id.
//!
//! ```rust
//! use objwire::protocol::interface::InterfaceDescriptor;
//!
//! let greeter = InterfaceDescriptor::builder("IGreeter")
//!     .method("SayHello")
//!     .method("Echo")
//!     .event("Greeted")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(greeter.method_id("Echo").unwrap(), 0);
//! assert_eq!(greeter.method_id("SayHello").unwrap(), 1);
//! let ids = greeter.event_ids("Greeted").unwrap();
//! assert_eq!((ids.add, ids.remove), (2, 3));
//! ```

use crate::core::plan::TypeTag;
use crate::core::serialization::{GraphReader, GraphValue, GraphWriter};
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::RESERVED_METHOD_BASE;
use std::collections::BTreeSet;
use std::fmt;

/// Method ids for subscribing to and unsubscribing from one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventIds {
    pub add: i16,
    pub remove: i16,
}

/// What an inbound method id means for an interface's events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EventEntry {
    name: String,
    ids: EventIds,
}

/// Name and id layout of a remotable interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    name: String,
    methods: Vec<String>,
    events: Vec<EventEntry>,
}

impl InterfaceDescriptor {
    pub fn builder(name: impl Into<String>) -> InterfaceBuilder {
        InterfaceBuilder {
            name: name.into(),
            methods: BTreeSet::new(),
            events: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Method names in id order.
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(String::as_str)
    }

    /// Event names in id order.
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(|e| e.name.as_str())
    }

    pub fn method_id(&self, method: &str) -> Result<i16> {
        self.methods
            .binary_search_by(|m| m.as_str().cmp(method))
            .map(|index| index as i16)
            .map_err(|_| {
                ProtocolError::InvalidArgument(format!("{} has no method '{method}'", self.name))
            })
    }

    pub fn method_name(&self, method_id: i16) -> Option<&str> {
        usize::try_from(method_id)
            .ok()
            .and_then(|index| self.methods.get(index))
            .map(String::as_str)
    }

    pub fn event_ids(&self, event: &str) -> Result<EventIds> {
        self.events
            .iter()
            .find(|e| e.name == event)
            .map(|e| e.ids)
            .ok_or_else(|| {
                ProtocolError::InvalidArgument(format!("{} has no event '{event}'", self.name))
            })
    }

    /// Event name for the add id carried in an Event block.
    pub fn event_name(&self, event_id: i16) -> Option<&str> {
        self.events
            .iter()
            .find(|e| e.ids.add == event_id)
            .map(|e| e.name.as_str())
    }

    /// Interpret `method_id` as an event subscription change, if it is one.
    pub fn event_action(&self, method_id: i16) -> Option<(EventIds, EventAction)> {
        self.events.iter().find_map(|e| {
            if e.ids.add == method_id {
                Some((e.ids, EventAction::Subscribe))
            } else if e.ids.remove == method_id {
                Some((e.ids, EventAction::Unsubscribe))
            } else {
                None
            }
        })
    }
}

impl fmt::Display for InterfaceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Collects method and event names; ids are assigned by [`InterfaceBuilder::build`].
#[derive(Debug, Clone)]
pub struct InterfaceBuilder {
    name: String,
    methods: BTreeSet<String>,
    events: BTreeSet<String>,
}

impl InterfaceBuilder {
    pub fn method(mut self, name: impl Into<String>) -> Self {
        self.methods.insert(name.into());
        self
    }

    pub fn event(mut self, name: impl Into<String>) -> Self {
        self.events.insert(name.into());
        self
    }

    /// # Errors
    /// `ConfigError` for an empty interface name, a name used as both method
    /// and event, or ids reaching the reserved range.
    pub fn build(self) -> Result<InterfaceDescriptor> {
        if self.name.is_empty() {
            return Err(ProtocolError::ConfigError("interface name cannot be empty".into()));
        }
        if let Some(clash) = self.methods.intersection(&self.events).next() {
            return Err(ProtocolError::ConfigError(format!(
                "{}: '{clash}' is both a method and an event",
                self.name
            )));
        }

        let total = self.methods.len() + 2 * self.events.len();
        if total > RESERVED_METHOD_BASE as usize {
            return Err(ProtocolError::ConfigError(format!(
                "{}: {total} method ids reach the reserved range",
                self.name
            )));
        }

        let first_event = self.methods.len() as i16;
        let events = self
            .events
            .into_iter()
            .enumerate()
            .map(|(index, name)| {
                let add = first_event + 2 * index as i16;
                EventEntry {
                    name,
                    ids: EventIds { add, remove: add + 1 },
                }
            })
            .collect();

        Ok(InterfaceDescriptor {
            name: self.name,
            methods: self.methods.into_iter().collect(),
            events,
        })
    }
}

/// A live object reference crossing the channel: the exporting side's object id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(i16);

impl ObjectHandle {
    pub const NULL: ObjectHandle = ObjectHandle(-1);

    pub const fn new(object_id: i16) -> Self {
        Self(object_id)
    }

    pub const fn object_id(self) -> i16 {
        self.0
    }

    pub const fn is_null_handle(self) -> bool {
        self.0 < 0
    }
}

impl Default for ObjectHandle {
    fn default() -> Self {
        Self::NULL
    }
}

impl GraphValue for ObjectHandle {
    const TAG: TypeTag = TypeTag::Primitive;

    fn write_value(&self, w: &mut GraphWriter<'_>) -> Result<()> {
        w.packer().write_i16(self.0);
        Ok(())
    }

    fn read_value(r: &mut GraphReader<'_>) -> Result<Self> {
        let id = r.packer().read_i16()?;
        Ok(if id < 0 { Self::NULL } else { Self(id) })
    }

    fn is_null(&self) -> bool {
        self.is_null_handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::serialization::Serializer;

    #[test]
    fn test_ids_ignore_declaration_order() {
        let a = InterfaceDescriptor::builder("I")
            .event("B")
            .method("z")
            .event("A")
            .method("a")
            .build()
            .unwrap();
        assert_eq!(a.methods().collect::<Vec<_>>(), ["a", "z"]);
        assert_eq!(a.event_ids("A").unwrap(), EventIds { add: 2, remove: 3 });
        assert_eq!(a.event_ids("B").unwrap(), EventIds { add: 4, remove: 5 });
        assert_eq!(a.event_name(4), Some("B"));
        assert_eq!(
            a.event_action(5),
            Some((EventIds { add: 4, remove: 5 }, EventAction::Unsubscribe))
        );
        assert_eq!(a.event_action(1), None);
        assert_eq!(a.method_name(1), Some("z"));
        assert!(a.method_id("missing").is_err());
    }

    #[test]
    fn test_reserved_range_rejected() {
        let mut builder = InterfaceDescriptor::builder("Big");
        for i in 0..901 {
            builder = builder.method(format!("m{i:04}"));
        }
        assert!(matches!(builder.build(), Err(ProtocolError::ConfigError(_))));
    }

    #[test]
    fn test_method_event_clash_rejected() {
        let result = InterfaceDescriptor::builder("I")
            .method("Changed")
            .event("Changed")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_handle_wire_form() {
        let s = Serializer::new();
        assert_eq!(&s.serialize(&ObjectHandle::NULL).unwrap()[..], &[0xff, 0xff]);
        assert_eq!(&s.serialize(&ObjectHandle::new(101)).unwrap()[..], &[101, 0]);
        let back: ObjectHandle = s.deserialize(bytes::Bytes::from_static(&[0, 0])).unwrap();
        assert_eq!(back.object_id(), 0);
    }
}
