//! # Exported Services
//!
//! The channel-side registry of local objects callable by the peer.
//!
//! Ids: the first export on a channel is the bootstrap object (id 0); every
//! later distinct instance gets the next id from 101 upward. Exporting an
//! instance that is already registered returns its existing id. Ids are never
//! reused, even after revocation.

use crate::core::serialization::Arguments;
use crate::error::{ProtocolError, Result};
use crate::protocol::block::EventBlock;
use crate::protocol::dispatcher::Dispatch;
use crate::protocol::handshake::BOOTSTRAP_OBJECT_ID;
use crate::protocol::interface::{EventAction, EventIds, InterfaceDescriptor, ObjectHandle};
use crate::service::channel::ChannelInner;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::{debug, trace};

/// First id handed out after the bootstrap object.
pub const FIRST_SERVICE_ID: i16 = 101;

/// A local instance exposed to the peer.
pub struct ServiceItem {
    object_id: i16,
    dispatch: Arc<dyn Dispatch>,
    subscriptions: Mutex<HashMap<i16, u32>>,
}

impl ServiceItem {
    pub fn object_id(&self) -> i16 {
        self.object_id
    }

    pub fn interface(&self) -> &Arc<InterfaceDescriptor> {
        self.dispatch.interface()
    }

    /// The exported instance, if it is an `S`.
    pub fn instance<S: Send + Sync + 'static>(&self) -> Option<Arc<S>> {
        self.dispatch.instance().downcast::<S>().ok()
    }

    pub(crate) fn dispatch(&self) -> &Arc<dyn Dispatch> {
        &self.dispatch
    }

    /// Apply a remote subscribe/unsubscribe and return the new count.
    pub fn apply_subscription(&self, ids: EventIds, action: EventAction) -> u32 {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let count = subscriptions.entry(ids.add).or_insert(0);
        *count = match action {
            EventAction::Subscribe => count.saturating_add(1),
            EventAction::Unsubscribe => count.saturating_sub(1),
        };
        let current = *count;
        if current == 0 {
            subscriptions.remove(&ids.add);
        }
        current
    }

    /// Whether the peer currently listens to the event with this add id.
    pub fn is_subscribed(&self, event_id: i16) -> bool {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event_id)
            .is_some_and(|count| *count > 0)
    }
}

impl std::fmt::Debug for ServiceItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceItem")
            .field("object_id", &self.object_id)
            .field("interface", &self.interface().name())
            .finish()
    }
}

/// Object id to exported service.
pub struct ServiceCache {
    items: HashMap<i16, Arc<ServiceItem>>,
    by_identity: HashMap<usize, i16>,
    next_id: i16,
    bootstrap_assigned: bool,
}

impl ServiceCache {
    pub fn new() -> Self {
        Self {
            items: HashMap::new(),
            by_identity: HashMap::new(),
            next_id: FIRST_SERVICE_ID,
            bootstrap_assigned: false,
        }
    }

    /// Register `dispatch`, or return the item already registered for its instance.
    pub fn export(&mut self, dispatch: Arc<dyn Dispatch>) -> Result<Arc<ServiceItem>> {
        let identity = dispatch.identity();
        if let Some(existing) = self
            .by_identity
            .get(&identity)
            .and_then(|id| self.items.get(id))
        {
            return Ok(Arc::clone(existing));
        }

        let object_id = if self.bootstrap_assigned {
            let id = self.next_id;
            self.next_id = id.checked_add(1).ok_or_else(|| {
                ProtocolError::InvalidArgument("object id space exhausted".into())
            })?;
            id
        } else {
            self.bootstrap_assigned = true;
            BOOTSTRAP_OBJECT_ID
        };

        let item = Arc::new(ServiceItem {
            object_id,
            dispatch,
            subscriptions: Mutex::new(HashMap::new()),
        });
        self.items.insert(object_id, Arc::clone(&item));
        self.by_identity.insert(identity, object_id);
        debug!(object_id, interface = %item.interface().name(), "Service exported");
        Ok(item)
    }

    pub fn get(&self, object_id: i16) -> Option<Arc<ServiceItem>> {
        self.items.get(&object_id).cloned()
    }

    /// The id-0 service, if still exported.
    pub fn bootstrap(&self) -> Option<Arc<ServiceItem>> {
        self.get(BOOTSTRAP_OBJECT_ID)
    }

    pub fn revoke(&mut self, object_id: i16) -> Option<Arc<ServiceItem>> {
        let item = self.items.remove(&object_id)?;
        self.by_identity.retain(|_, id| *id != object_id);
        debug!(object_id, "Service revoked");
        Some(item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.by_identity.clear();
    }
}

impl Default for ServiceCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner-side handle to an exported service.
#[derive(Clone)]
pub struct ServiceHandle {
    item: Arc<ServiceItem>,
    channel: Weak<ChannelInner>,
}

impl ServiceHandle {
    pub(crate) fn new(item: Arc<ServiceItem>, channel: Weak<ChannelInner>) -> Self {
        Self { item, channel }
    }

    pub fn object_id(&self) -> i16 {
        self.item.object_id()
    }

    /// Handle to pass to the peer inside call arguments or results.
    pub fn handle(&self) -> ObjectHandle {
        ObjectHandle::new(self.item.object_id())
    }

    pub fn is_subscribed(&self, event: &str) -> Result<bool> {
        let ids = self.item.interface().event_ids(event)?;
        Ok(self.item.is_subscribed(ids.add))
    }

    /// Raise `event` on the peer.
    ///
    /// Returns `false` without sending anything while the peer has no
    /// subscription for it.
    pub async fn fire_event<A: Arguments>(&self, event: &str, args: A) -> Result<bool> {
        let ids = self.item.interface().event_ids(event)?;
        if !self.item.is_subscribed(ids.add) {
            trace!(object_id = self.object_id(), event, "No subscribers, event skipped");
            return Ok(false);
        }
        let channel = self
            .channel
            .upgrade()
            .ok_or(ProtocolError::ConnectionClosed)?;
        let payload = channel.serializer().serialize_args(&args)?;
        channel
            .send_event(EventBlock {
                object_id: self.object_id(),
                event_id: ids.add,
                payload,
            })
            .await?;
        Ok(true)
    }

    /// Remove the service from its channel.
    pub fn revoke(&self) -> bool {
        match self.channel.upgrade() {
            Some(channel) => channel.revoke(self.object_id()),
            None => false,
        }
    }
}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("object_id", &self.object_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::dispatcher::{BoundService, DispatchTable};

    struct Dummy;

    fn bound(instance: &Arc<Dummy>) -> Arc<dyn Dispatch> {
        let interface = Arc::new(
            InterfaceDescriptor::builder("IDummy")
                .method("Noop")
                .event("Changed")
                .build()
                .unwrap(),
        );
        let table = Arc::new(DispatchTable::<Dummy>::builder(interface).build().unwrap());
        Arc::new(BoundService::new(Arc::clone(instance), table))
    }

    #[test]
    fn test_id_assignment() {
        let mut cache = ServiceCache::new();
        let a = Arc::new(Dummy);
        let b = Arc::new(Dummy);
        let c = Arc::new(Dummy);

        assert_eq!(cache.export(bound(&a)).unwrap().object_id(), 0);
        assert_eq!(cache.export(bound(&b)).unwrap().object_id(), 101);
        assert_eq!(cache.export(bound(&a)).unwrap().object_id(), 0);
        assert_eq!(cache.export(bound(&c)).unwrap().object_id(), 102);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_revoked_ids_not_reused() {
        let mut cache = ServiceCache::new();
        let a = Arc::new(Dummy);
        let b = Arc::new(Dummy);
        cache.export(bound(&a)).unwrap();
        assert!(cache.revoke(0).is_some());
        assert!(cache.bootstrap().is_none());
        assert_eq!(cache.export(bound(&b)).unwrap().object_id(), 101);
        assert_eq!(cache.export(bound(&a)).unwrap().object_id(), 102);
    }

    #[test]
    fn test_subscription_counting() {
        let mut cache = ServiceCache::new();
        let item = cache.export(bound(&Arc::new(Dummy))).unwrap();
        let ids = item.interface().event_ids("Changed").unwrap();

        assert!(!item.is_subscribed(ids.add));
        assert_eq!(item.apply_subscription(ids, EventAction::Subscribe), 1);
        assert_eq!(item.apply_subscription(ids, EventAction::Subscribe), 2);
        assert!(item.is_subscribed(ids.add));
        assert_eq!(item.apply_subscription(ids, EventAction::Unsubscribe), 1);
        assert_eq!(item.apply_subscription(ids, EventAction::Unsubscribe), 0);
        assert!(!item.is_subscribed(ids.add));
        assert_eq!(item.apply_subscription(ids, EventAction::Unsubscribe), 0);
    }
}
