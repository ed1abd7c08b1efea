//! # Proxies
//!
//! A [`Proxy`] stands in for one object exported by the peer. Calls are
//! addressed by method name and resolved to ids through the proxy's
//! [`InterfaceDescriptor`]; events are delivered to local handlers registered
//! with [`Proxy::subscribe`].
//!
//! The channel keeps exactly one proxy per remote object id in its
//! [`ProxyCache`]; clones of a `Proxy` share handlers and state.

use crate::core::serialization::{Arguments, GraphValue, Serializer};
use crate::error::{ProtocolError, Result};
use crate::protocol::interface::{EventIds, InterfaceDescriptor, ObjectHandle};
use crate::service::channel::ChannelInner;
use crate::service::ticket::closed;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

type EventHandler = Arc<dyn Fn(&Serializer, Bytes) + Send + Sync>;

/// Token returned by [`Proxy::subscribe`], needed to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    event: EventIds,
    id: u64,
}

impl Subscription {
    /// Add id of the subscribed event.
    pub fn event_id(&self) -> i16 {
        self.event.add
    }
}

struct ProxyInner {
    channel: Weak<ChannelInner>,
    object_id: i16,
    interface: Arc<InterfaceDescriptor>,
    handlers: Mutex<HashMap<i16, Vec<(u64, EventHandler)>>>,
    /// Held across the remote add/remove so handler counts match the peer.
    registration: AsyncMutex<()>,
    next_subscription: AtomicU64,
    disposed: AtomicBool,
}

/// Local stand-in for a remote object.
#[derive(Clone)]
pub struct Proxy(Arc<ProxyInner>);

impl Proxy {
    pub(crate) fn new(
        channel: Weak<ChannelInner>,
        object_id: i16,
        interface: Arc<InterfaceDescriptor>,
    ) -> Self {
        Self(Arc::new(ProxyInner {
            channel,
            object_id,
            interface,
            handlers: Mutex::new(HashMap::new()),
            registration: AsyncMutex::new(()),
            next_subscription: AtomicU64::new(1),
            disposed: AtomicBool::new(false),
        }))
    }

    pub fn object_id(&self) -> i16 {
        self.0.object_id
    }

    pub fn interface(&self) -> &Arc<InterfaceDescriptor> {
        &self.0.interface
    }

    /// Handle naming the remote object, for passing it back to its owner.
    pub fn handle(&self) -> ObjectHandle {
        ObjectHandle::new(self.0.object_id)
    }

    pub fn is_disposed(&self) -> bool {
        self.0.disposed.load(Ordering::Acquire)
    }

    pub fn ptr_eq(&self, other: &Proxy) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn handlers(&self) -> MutexGuard<'_, HashMap<i16, Vec<(u64, EventHandler)>>> {
        self.0.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn channel(&self) -> Result<Arc<ChannelInner>> {
        if self.is_disposed() {
            return Err(closed());
        }
        self.0.channel.upgrade().ok_or(ProtocolError::ConnectionClosed)
    }

    /// Invoke `method` on the remote object and decode its result.
    ///
    /// # Errors
    /// `RemoteCall` with the peer's error text when the method failed
    /// remotely, `Timeout` after the channel's call timeout.
    pub async fn call<A: Arguments, R: GraphValue>(&self, method: &str, args: A) -> Result<R> {
        let method_id = self.0.interface.method_id(method)?;
        let channel = self.channel()?;
        let payload = channel.serializer().serialize_args(&args)?;
        let reply = channel
            .call_raw(self.0.object_id, method_id, payload)
            .await?;
        channel.serializer().deserialize(reply)
    }

    /// Blocking form of [`Proxy::call`] for threads outside the runtime.
    pub fn call_blocking<A: Arguments, R: GraphValue>(&self, method: &str, args: A) -> Result<R> {
        let method_id = self.0.interface.method_id(method)?;
        let channel = self.channel()?;
        let payload = channel.serializer().serialize_args(&args)?;
        let reply = channel.call_blocking_raw(self.0.object_id, method_id, payload)?;
        channel.serializer().deserialize(reply)
    }

    /// Register `handler` for `event`. The first handler for an event
    /// subscribes on the remote object.
    ///
    /// Handlers run on the channel's read loop and should return quickly.
    /// A failed remote subscribe leaves no handler behind, also for callers
    /// that were waiting on the same event.
    pub async fn subscribe<A, F>(&self, event: &str, handler: F) -> Result<Subscription>
    where
        A: Arguments,
        F: Fn(A) + Send + Sync + 'static,
    {
        let ids = self.0.interface.event_ids(event)?;
        let channel = self.channel()?;
        let object_id = self.0.object_id;
        let event_name = event.to_string();
        let wrapped: EventHandler = Arc::new(move |serializer: &Serializer, payload: Bytes| {
            match serializer.deserialize_args::<A>(payload) {
                Ok(args) => handler(args),
                Err(e) => warn!(object_id, event = %event_name, error = %e, "Undecodable event dropped"),
            }
        });

        let id = self.0.next_subscription.fetch_add(1, Ordering::Relaxed);
        let _registration = self.0.registration.lock().await;
        let first = {
            let mut handlers = self.handlers();
            let list = handlers.entry(ids.add).or_default();
            list.push((id, wrapped));
            list.len() == 1
        };

        if first {
            if let Err(e) = channel.call_raw(object_id, ids.add, Bytes::new()).await {
                self.remove_handler(ids.add, id);
                return Err(e);
            }
            debug!(object_id, event, "Subscribed remotely");
        }
        Ok(Subscription { event: ids, id })
    }

    /// Remove a handler. Removing the last one for its event unsubscribes
    /// on the remote object.
    ///
    /// Returns `false` when the subscription was already gone.
    pub async fn unsubscribe(&self, subscription: Subscription) -> Result<bool> {
        let _registration = self.0.registration.lock().await;
        let Some(last) = self.remove_handler(subscription.event.add, subscription.id) else {
            return Ok(false);
        };
        if last {
            let channel = self.channel()?;
            channel
                .call_raw(self.0.object_id, subscription.event.remove, Bytes::new())
                .await?;
            debug!(object_id = self.0.object_id, event_id = subscription.event.add, "Unsubscribed remotely");
        }
        Ok(true)
    }

    /// Remove handler `id`; `Some(true)` when it was the event's last handler.
    fn remove_handler(&self, event_id: i16, id: u64) -> Option<bool> {
        let mut handlers = self.handlers();
        let list = handlers.get_mut(&event_id)?;
        let position = list.iter().position(|(handler_id, _)| *handler_id == id)?;
        list.remove(position);
        let last = list.is_empty();
        if last {
            handlers.remove(&event_id);
        }
        Some(last)
    }

    /// Number of local handlers for `event`.
    pub fn handler_count(&self, event: &str) -> Result<usize> {
        let ids = self.0.interface.event_ids(event)?;
        Ok(self.handlers().get(&ids.add).map_or(0, Vec::len))
    }

    /// Run every handler for `event_id`; returns how many ran.
    pub(crate) fn deliver(&self, serializer: &Serializer, event_id: i16, payload: Bytes) -> usize {
        let handlers: Vec<EventHandler> = self
            .handlers()
            .get(&event_id)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        for handler in &handlers {
            handler(serializer, payload.clone());
        }
        handlers.len()
    }

    /// Drop every handler and unregister them remotely, best-effort.
    pub async fn dispose(&self) {
        if self.0.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let events: Vec<i16> = self.handlers().drain().map(|(event_id, _)| event_id).collect();
        let Some(channel) = self.0.channel.upgrade() else {
            return;
        };
        channel.proxies_mut().remove(self.0.object_id);

        for event_id in events {
            let Some((ids, _)) = self.0.interface.event_action(event_id) else {
                continue;
            };
            if let Err(e) = channel
                .call_raw(self.0.object_id, ids.remove, Bytes::new())
                .await
            {
                debug!(object_id = self.0.object_id, event_id, error = %e, "Remote unsubscribe on dispose failed");
            }
        }
        debug!(object_id = self.0.object_id, "Proxy disposed");
    }

    /// Dispose without talking to the peer.
    pub(crate) fn dispose_local(&self) {
        self.0.disposed.store(true, Ordering::Release);
        self.handlers().clear();
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("object_id", &self.0.object_id)
            .field("interface", &self.0.interface.name())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Remote object id to proxy, remembering creation order.
#[derive(Debug, Default)]
pub struct ProxyCache {
    map: HashMap<i16, Proxy>,
    order: Vec<i16>,
}

impl ProxyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, object_id: i16) -> Option<&Proxy> {
        self.map.get(&object_id)
    }

    pub fn insert(&mut self, proxy: Proxy) {
        let object_id = proxy.object_id();
        if self.map.insert(object_id, proxy).is_none() {
            self.order.push(object_id);
        }
    }

    pub fn remove(&mut self, object_id: i16) -> Option<Proxy> {
        let proxy = self.map.remove(&object_id)?;
        self.order.retain(|id| *id != object_id);
        Some(proxy)
    }

    /// Empty the cache, returning proxies in creation order.
    pub fn drain(&mut self) -> Vec<Proxy> {
        let order = std::mem::take(&mut self.order);
        order
            .into_iter()
            .filter_map(|id| self.map.remove(&id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached(object_id: i16) -> Proxy {
        let interface = Arc::new(
            InterfaceDescriptor::builder("IFeed")
                .method("Latest")
                .event("Posted")
                .build()
                .unwrap(),
        );
        Proxy::new(Weak::new(), object_id, interface)
    }

    #[test]
    fn test_cache_drains_in_creation_order() {
        let mut cache = ProxyCache::new();
        cache.insert(detached(105));
        cache.insert(detached(0));
        cache.insert(detached(101));
        cache.remove(0);

        let ids: Vec<i16> = cache.drain().iter().map(Proxy::object_id).collect();
        assert_eq!(ids, [105, 101]);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_call_without_channel_fails() {
        let proxy = detached(0);
        let result: Result<i32> = proxy.call("Latest", ()).await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));

        let unknown: Result<i32> = proxy.call("Missing", ()).await;
        assert!(matches!(unknown, Err(ProtocolError::InvalidArgument(_))));
    }

    #[test]
    fn test_deliver_runs_local_handlers() {
        use std::sync::atomic::AtomicUsize;

        let proxy = detached(101);
        let ids = proxy.interface().event_ids("Posted").unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let handler: EventHandler = Arc::new(move |s: &Serializer, payload: Bytes| {
            let (text,): (String,) = s.deserialize_args(payload).unwrap();
            assert_eq!(text, "hi");
            seen.fetch_add(1, Ordering::SeqCst);
        });
        proxy.handlers().insert(ids.add, vec![(1, handler)]);

        let serializer = Serializer::new();
        let payload = serializer.serialize_args(&("hi".to_string(),)).unwrap();
        assert_eq!(proxy.deliver(&serializer, ids.add, payload), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        proxy.dispose_local();
        assert!(proxy.is_disposed());
        assert_eq!(proxy.handler_count("Posted").unwrap(), 0);
    }
}
