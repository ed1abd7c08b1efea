//! # Data Channel
//!
//! Multiplexes calls, replies and events for both peers over one duplex byte
//! stream.
//!
//! ## Sections
//! - **Read section**: an async mutex around the framed reader, held by the
//!   single read loop of the current attachment while it reads one frame.
//! - **Write section**: an async mutex around the framed writer, held for
//!   exactly one frame per send.
//!
//! Callers waiting for replies hold neither section; they wait on a ticket
//! from the channel's [`TicketBook`]. Every inbound Call runs in its own task,
//! so a slow method never stalls the read loop.
//!
//! ## Attachments
//! A channel outlives its streams. [`DataChannel::attach`] installs a new
//! stream (first connection or reconnect) and starts its read loop under a
//! child of the channel's cancellation token. Losing the stream fails every
//! pending call, publishes [`LinkState::Lost`] and keeps exported services and
//! proxies, so a later `attach` resumes the same session.
//!
//! ## Example
//! ```rust,no_run
//! use objwire::config::ChannelConfig;
//! use objwire::service::channel::{DataChannel, Role};
//!
//! # async fn run() -> objwire::error::Result<()> {
//! let (a, b) = tokio::io::duplex(64 * 1024);
//! let server = DataChannel::new(Role::Server, ChannelConfig::default())?;
//! let client = DataChannel::new(Role::Client, ChannelConfig::default())?;
//! server.attach(a).await?;
//! client.attach(b).await?;
//! client.ping().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::ChannelConfig;
use crate::core::codec::FrameCodec;
use crate::core::frame::{kind, RawFrame, LENGTH_PREFIX};
use crate::core::serialization::Serializer;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::block::{Block, CallBlock, EventBlock, ReplyBlock};
use crate::protocol::dispatcher::{BoundService, CallContext, DispatchTable};
use crate::protocol::handshake::{
    client_failure, AccessControl, AllowAll, ServerHandshake, BOOTSTRAP_OBJECT_ID,
    CHANNEL_OBJECT_ID, PING, VERIFY_ACCESS_TOKEN, VERIFY_INTERFACE,
};
use crate::protocol::interface::{InterfaceDescriptor, ObjectHandle};
use crate::service::objects::{ServiceCache, ServiceHandle, ServiceItem};
use crate::service::proxy::{Proxy, ProxyCache};
use crate::service::ticket::{closed, TicketBook, TicketOutcome};
use crate::utils::metrics::{Metrics, Timer};
use bytes::Bytes;
use futures::{FutureExt, SinkExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;
type FrameReader = FramedRead<BoxedRead, FrameCodec>;
type FrameWriter = FramedWrite<BoxedWrite, FrameCodec>;
type ChannelEventHandler = Arc<dyn Fn(i16, Bytes) + Send + Sync>;

/// Which end of the session this channel is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Connection status of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No stream attached yet, or detached on purpose.
    Detached,
    Attached,
    /// The stream failed; pending calls were failed.
    Lost,
    /// Closed for good.
    Closed,
}

struct Attachment {
    token: CancellationToken,
    task: JoinHandle<()>,
}

pub(crate) struct ChannelInner {
    role: Role,
    config: ChannelConfig,
    serializer: Serializer,
    tickets: TicketBook,
    reader: AsyncMutex<Option<FrameReader>>,
    writer: AsyncMutex<Option<FrameWriter>>,
    services: RwLock<ServiceCache>,
    proxies: RwLock<ProxyCache>,
    cancel: CancellationToken,
    attachment: Mutex<Option<Attachment>>,
    attach_lock: AsyncMutex<()>,
    link: watch::Sender<LinkState>,
    detached_since: Mutex<Option<Instant>>,
    handshake: ServerHandshake,
    access: Arc<dyn AccessControl>,
    event_handler: RwLock<Option<ChannelEventHandler>>,
    metrics: Metrics,
    runtime: Handle,
}

impl ChannelInner {
    pub(crate) fn serializer(&self) -> &Serializer {
        &self.serializer
    }

    fn services(&self) -> RwLockReadGuard<'_, ServiceCache> {
        self.services.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn services_mut(&self) -> RwLockWriteGuard<'_, ServiceCache> {
        self.services.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn proxies(&self) -> RwLockReadGuard<'_, ProxyCache> {
        self.proxies.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn proxies_mut(&self) -> RwLockWriteGuard<'_, ProxyCache> {
        self.proxies.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(closed())
        } else {
            Ok(())
        }
    }

    /// Write one block under the write section.
    pub(crate) async fn send_block(&self, block: Block) -> Result<()> {
        self.ensure_open()?;
        let frame = block.into_frame();
        let (frame_kind, size) = (frame.kind, (LENGTH_PREFIX + frame.wire_len()) as u64);

        {
            let mut writer = self.writer.lock().await;
            let writer = writer.as_mut().ok_or_else(|| {
                ProtocolError::TransportError(constants::ERR_CHANNEL_DETACHED.into())
            })?;
            writer.send(frame).await?;
        }

        match frame_kind {
            kind::CALL => self.metrics.call_sent(size),
            kind::REPLY => self.metrics.reply_sent(size),
            _ => self.metrics.event_sent(size),
        }
        Ok(())
    }

    pub(crate) async fn send_event(&self, event: EventBlock) -> Result<()> {
        self.send_block(event.into()).await
    }

    pub(crate) fn revoke(&self, object_id: i16) -> bool {
        self.services_mut().revoke(object_id).is_some()
    }

    fn record_outcome(&self, result: &Result<Bytes>, request_id: i32) {
        match result {
            Err(ProtocolError::Timeout) => {
                self.metrics.call_timeout();
                warn!(request_id, "Call timed out");
            }
            Err(ProtocolError::RemoteCall(text)) => {
                self.metrics.remote_error();
                debug!(request_id, error = %text, "Call failed remotely");
            }
            _ => {}
        }
    }

    /// Send a Call and await its Reply.
    pub(crate) async fn call_raw(&self, object_id: i16, method_id: i16, payload: Bytes) -> Result<Bytes> {
        self.ensure_open()?;
        let guard = self.tickets.checkout()?;
        let request_id = guard.serial();
        trace!(request_id, object_id, method_id, "Sending call");

        self.send_block(
            CallBlock {
                request_id,
                object_id,
                method_id,
                payload,
            }
            .into(),
        )
        .await?;

        let result = guard.wait(self.config.call_timeout).await;
        self.record_outcome(&result, request_id);
        result
    }

    /// Send a Call from a plain thread and block it until the Reply arrives.
    pub(crate) fn call_blocking_raw(
        self: &Arc<Self>,
        object_id: i16,
        method_id: i16,
        payload: Bytes,
    ) -> Result<Bytes> {
        self.ensure_open()?;
        let guard = self.tickets.checkout()?;
        let request_id = guard.serial();
        let ticket = Arc::clone(guard.ticket());
        let inner = Arc::clone(self);

        self.runtime.spawn(async move {
            let block = CallBlock {
                request_id,
                object_id,
                method_id,
                payload,
            };
            if let Err(e) = inner.send_block(block.into()).await {
                ticket.complete(request_id, TicketOutcome::Aborted(e.to_string()));
            }
        });

        let result = guard.wait_blocking(self.config.call_timeout);
        self.record_outcome(&result, request_id);
        result
    }

    async fn stop_attachment(&self) {
        let attachment = self
            .attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(attachment) = attachment {
            attachment.token.cancel();
            if let Err(e) = attachment.task.await {
                warn!(error = %e, "Read loop ended abnormally");
            }
        }
    }

    fn set_detached(&self, since: Option<Instant>) {
        *self
            .detached_since
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = since;
    }

    fn bootstrap_interface(&self) -> Option<String> {
        self.services()
            .bootstrap()
            .map(|item| item.interface().name().to_string())
    }
}

/// Handle to one multiplexed session. Clones share the channel.
#[derive(Clone)]
pub struct DataChannel {
    inner: Arc<ChannelInner>,
}

/// Options for a [`DataChannel`].
pub struct ChannelBuilder {
    role: Role,
    config: ChannelConfig,
    serializer: Serializer,
    access: Arc<dyn AccessControl>,
}

impl ChannelBuilder {
    pub fn config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    /// Share plans with other channels by passing a clone of one serializer.
    pub fn serializer(mut self, serializer: Serializer) -> Self {
        self.serializer = serializer;
        self
    }

    /// Access policy consulted by the handshake on server channels.
    pub fn access_control(mut self, access: Arc<dyn AccessControl>) -> Self {
        self.access = access;
        self
    }

    /// # Errors
    /// Fails outside a Tokio runtime.
    pub fn build(self) -> Result<DataChannel> {
        let runtime = Handle::try_current()
            .map_err(|_| ProtocolError::Custom(constants::ERR_NO_RUNTIME.into()))?;
        let (link, _) = watch::channel(LinkState::Detached);

        Ok(DataChannel {
            inner: Arc::new(ChannelInner {
                role: self.role,
                tickets: TicketBook::new(self.config.ticket_pool_limit),
                config: self.config,
                serializer: self.serializer,
                reader: AsyncMutex::new(None),
                writer: AsyncMutex::new(None),
                services: RwLock::new(ServiceCache::new()),
                proxies: RwLock::new(ProxyCache::new()),
                cancel: CancellationToken::new(),
                attachment: Mutex::new(None),
                attach_lock: AsyncMutex::new(()),
                link,
                detached_since: Mutex::new(Some(Instant::now())),
                handshake: ServerHandshake::new(),
                access: self.access,
                event_handler: RwLock::new(None),
                metrics: Metrics::new(),
                runtime,
            }),
        })
    }
}

impl DataChannel {
    pub fn builder(role: Role) -> ChannelBuilder {
        ChannelBuilder {
            role,
            config: ChannelConfig::default(),
            serializer: Serializer::new(),
            access: Arc::new(AllowAll),
        }
    }

    /// Channel with default serializer and an allow-all access policy.
    pub fn new(role: Role, config: ChannelConfig) -> Result<Self> {
        Self::builder(role).config(config).build()
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    pub fn serializer(&self) -> &Serializer {
        &self.inner.serializer
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// Client id accepted by the handshake of the current attachment.
    pub fn client_id(&self) -> Option<String> {
        self.inner.handshake.client_id()
    }

    pub fn is_handshake_complete(&self) -> bool {
        self.inner.handshake.is_complete()
    }

    pub fn ptr_eq(&self, other: &DataChannel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ---- attachment ----------------------------------------------------

    /// Install `stream` and start its read loop, replacing any current stream.
    #[instrument(skip(self, stream), fields(role = ?self.inner.role))]
    pub async fn attach<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let inner = &self.inner;
        inner.ensure_open()?;
        let _attaching = inner.attach_lock.lock().await;
        inner.ensure_open()?;
        inner.stop_attachment().await;

        let (read_half, write_half): (ReadHalf<S>, WriteHalf<S>) = tokio::io::split(stream);
        let codec = FrameCodec::new(inner.config.max_frame_size);
        *inner.reader.lock().await = Some(FramedRead::new(Box::new(read_half) as BoxedRead, codec));
        *inner.writer.lock().await = Some(FramedWrite::new(Box::new(write_half) as BoxedWrite, codec));

        inner.handshake.reset();
        inner.set_detached(None);

        let token = inner.cancel.child_token();
        let task = inner
            .runtime
            .spawn(read_loop(self.clone(), token.clone()));
        *inner
            .attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Attachment { token, task });

        inner.link.send_replace(LinkState::Attached);
        inner.metrics.attached();
        debug!("Stream attached");
        Ok(())
    }

    /// Stop the current read loop and drop the stream, keeping the session.
    pub async fn detach(&self) {
        let inner = &self.inner;
        let _attaching = inner.attach_lock.lock().await;
        inner.stop_attachment().await;
        let writer = inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.close().await {
                debug!(error = %e, "Writer shutdown failed");
            }
        }
        inner.reader.lock().await.take();
        inner.tickets.fail_all();
        if !inner.cancel.is_cancelled() {
            inner.set_detached(Some(Instant::now()));
            inner.link.send_replace(LinkState::Detached);
        }
    }

    pub fn link_state(&self) -> LinkState {
        *self.inner.link.borrow()
    }

    /// Receiver that observes every link state change.
    pub fn watch_link(&self) -> watch::Receiver<LinkState> {
        self.inner.link.subscribe()
    }

    /// How long the channel has been without a stream, if it has none.
    pub fn detached_for(&self) -> Option<Duration> {
        self.inner
            .detached_since
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|since| since.elapsed())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Shut the channel down for good.
    ///
    /// Pending calls fail with `ConnectionClosed` and proxies are disposed
    /// locally in reverse creation order. Idempotent.
    #[instrument(skip(self), fields(role = ?self.inner.role))]
    pub async fn close(&self) {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return;
        }
        inner.cancel.cancel();

        let _attaching = inner.attach_lock.lock().await;
        inner.stop_attachment().await;
        let failed = inner.tickets.fail_all();

        let proxies = inner.proxies_mut().drain();
        for proxy in proxies.iter().rev() {
            proxy.dispose_local();
        }
        inner.services_mut().clear();
        inner.tickets.drain_pool();

        let writer = inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.close().await {
                debug!(error = %e, "Writer shutdown failed");
            }
        }
        inner.reader.lock().await.take();

        inner.set_detached(Some(Instant::now()));
        inner.link.send_replace(LinkState::Closed);
        info!(failed_calls = failed, "Channel closed");
        inner.metrics.log_metrics();
    }

    // ---- calls ---------------------------------------------------------

    /// Call `method_id` on the peer's object with a pre-serialized payload.
    pub async fn call_raw(&self, object_id: i16, method_id: i16, payload: Bytes) -> Result<Bytes> {
        self.inner.call_raw(object_id, method_id, payload).await
    }

    /// Blocking form of [`DataChannel::call_raw`].
    ///
    /// Must be called from a thread that is not driving the channel's
    /// runtime (a plain thread or `spawn_blocking`), otherwise the send can
    /// never run.
    pub fn call_blocking_raw(&self, object_id: i16, method_id: i16, payload: Bytes) -> Result<Bytes> {
        self.inner.call_blocking_raw(object_id, method_id, payload)
    }

    /// Channel-level round trip.
    pub async fn ping(&self) -> Result<()> {
        self.inner
            .call_raw(CHANNEL_OBJECT_ID, PING, Bytes::new())
            .await
            .map(|_| ())
    }

    /// Client side of the handshake: verify the bootstrap interface, then
    /// present `client_id`.
    #[instrument(skip(self))]
    pub async fn handshake(&self, interface_name: &str, client_id: &str) -> Result<()> {
        let serializer = &self.inner.serializer;
        let payload = serializer.serialize_args(&(interface_name.to_string(),))?;
        self.inner
            .call_raw(CHANNEL_OBJECT_ID, VERIFY_INTERFACE, payload)
            .await
            .map_err(client_failure)?;

        let payload = serializer.serialize_args(&(client_id.to_string(),))?;
        self.inner
            .call_raw(CHANNEL_OBJECT_ID, VERIFY_ACCESS_TOKEN, payload)
            .await
            .map_err(client_failure)?;
        debug!("Handshake complete");
        Ok(())
    }

    /// Raise a raw event on the peer.
    pub async fn send_event(&self, event: EventBlock) -> Result<()> {
        self.inner.send_event(event).await
    }

    /// Handler for Event blocks addressed to the channel itself (negative object id).
    pub fn on_channel_event<F>(&self, handler: F)
    where
        F: Fn(i16, Bytes) + Send + Sync + 'static,
    {
        *self
            .inner
            .event_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    // ---- objects -------------------------------------------------------

    /// Expose `instance` to the peer. The first export becomes the bootstrap object.
    pub fn export<S: Send + Sync + 'static>(
        &self,
        instance: Arc<S>,
        table: Arc<DispatchTable<S>>,
    ) -> Result<ServiceHandle> {
        let item = self
            .inner
            .services_mut()
            .export(Arc::new(BoundService::new(instance, table)))?;
        Ok(ServiceHandle::new(item, Arc::downgrade(&self.inner)))
    }

    pub fn revoke(&self, object_id: i16) -> bool {
        self.inner.revoke(object_id)
    }

    /// The local service a handle names, for handles that point back at this side.
    pub fn service(&self, handle: ObjectHandle) -> Option<Arc<ServiceItem>> {
        if handle.is_null_handle() {
            return None;
        }
        self.inner.services().get(handle.object_id())
    }

    pub fn exported_count(&self) -> usize {
        self.inner.services().len()
    }

    /// The single proxy for the peer's `object_id`, created on first use.
    ///
    /// # Errors
    /// `InvalidArgument` when a proxy for the id exists with another interface.
    pub fn proxy(&self, object_id: i16, interface: Arc<InterfaceDescriptor>) -> Result<Proxy> {
        self.inner.ensure_open()?;
        if let Some(existing) = self.inner.proxies().get(object_id) {
            return check_interface(existing, &interface);
        }

        let mut proxies = self.inner.proxies_mut();
        if let Some(existing) = proxies.get(object_id) {
            return check_interface(existing, &interface);
        }
        let proxy = Proxy::new(Arc::downgrade(&self.inner), object_id, interface);
        proxies.insert(proxy.clone());
        debug!(object_id, interface = %proxy.interface().name(), "Proxy created");
        Ok(proxy)
    }

    /// Proxy for the peer's bootstrap object.
    pub fn bootstrap_proxy(&self, interface: Arc<InterfaceDescriptor>) -> Result<Proxy> {
        self.proxy(BOOTSTRAP_OBJECT_ID, interface)
    }

    /// Proxy for a handle received from the peer; `None` for the null handle.
    pub fn resolve(
        &self,
        handle: ObjectHandle,
        interface: Arc<InterfaceDescriptor>,
    ) -> Result<Option<Proxy>> {
        if handle.is_null_handle() {
            return Ok(None);
        }
        self.proxy(handle.object_id(), interface).map(Some)
    }

    pub fn proxy_count(&self) -> usize {
        self.inner.proxies().len()
    }

    /// Calls sent and still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.tickets.pending_len()
    }

    /// Idle tickets ready for reuse.
    pub fn idle_tickets(&self) -> usize {
        self.inner.tickets.pool_len()
    }

    // ---- inbound -------------------------------------------------------

    async fn next_frame(&self) -> Option<Result<RawFrame>> {
        let mut reader = self.inner.reader.lock().await;
        match reader.as_mut() {
            Some(reader) => reader.next().await,
            None => None,
        }
    }

    fn route(&self, block: Block) {
        let inner = &self.inner;
        match block {
            Block::Call(call) => {
                inner.metrics.call_received();
                let channel = self.clone();
                inner.runtime.spawn(async move { channel.serve_call(call).await });
            }
            Block::Reply(reply) => {
                let request_id = reply.request_id;
                let outcome = match reply.error_text() {
                    None => TicketOutcome::Reply(reply.payload),
                    Some(text) => TicketOutcome::Failed(text),
                };
                let matched = inner.tickets.complete(request_id, outcome);
                inner.metrics.reply_received(matched);
                if !matched {
                    debug!(request_id, "Reply for a request that is no longer pending dropped");
                }
            }
            Block::Event(event) => {
                inner.metrics.event_received();
                self.route_event(event);
            }
        }
    }

    fn route_event(&self, event: EventBlock) {
        let inner = &self.inner;
        if event.object_id < 0 {
            let handler = inner
                .event_handler
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            match handler {
                Some(handler) => handler(event.event_id, event.payload),
                None => trace!(event_id = event.event_id, "Channel event without handler"),
            }
            return;
        }

        let proxy = inner.proxies().get(event.object_id).cloned();
        match proxy {
            Some(proxy) => {
                let delivered = proxy.deliver(&inner.serializer, event.event_id, event.payload);
                trace!(object_id = event.object_id, event_id = event.event_id, delivered, "Event delivered");
            }
            None => debug!(
                object_id = event.object_id,
                event_id = event.event_id,
                "Event for unknown proxy dropped"
            ),
        }
    }

    async fn serve_call(self, call: CallBlock) {
        let request_id = call.request_id;
        let (object_id, method_id) = (call.object_id, call.method_id);
        let _timer = Timer::start("serve_call");

        let result = match AssertUnwindSafe(self.invoke(call)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::Custom(format!("method {method_id} panicked"))),
        };
        let reply = match result {
            Ok(payload) => ReplyBlock::success(request_id, payload),
            Err(e) => {
                debug!(request_id, object_id, method_id, error = %e, "Call failed");
                ReplyBlock::failure(request_id, &failure_text(&e))
            }
        };

        if let Err(e) = self.inner.send_block(reply.into()).await {
            warn!(request_id, error = %e, "Failed to send reply");
        }
    }

    async fn invoke(&self, call: CallBlock) -> Result<Bytes> {
        let inner = &self.inner;
        if call.object_id < 0 {
            return self.invoke_channel(call.method_id, call.payload);
        }
        if inner.role == Role::Server && inner.config.require_handshake {
            inner.handshake.require_complete()?;
        }

        let item = inner
            .services()
            .get(call.object_id)
            .ok_or(ProtocolError::UnknownObject(call.object_id))?;

        if let Some((ids, action)) = item.interface().event_action(call.method_id) {
            let count = item.apply_subscription(ids, action);
            debug!(object_id = call.object_id, event_id = ids.add, ?action, count, "Subscription changed");
            return Ok(Bytes::new());
        }

        let ctx = CallContext::new(self.clone(), call.object_id, call.method_id, call.request_id);
        item.dispatch().invoke(call.method_id, call.payload, ctx).await
    }

    fn invoke_channel(&self, method_id: i16, payload: Bytes) -> Result<Bytes> {
        let inner = &self.inner;
        match method_id {
            PING => Ok(Bytes::new()),
            VERIFY_INTERFACE => {
                let (name,): (String,) = inner.serializer.deserialize_args(payload)?;
                let exported = inner.bootstrap_interface();
                inner.handshake.verify_interface(&name, exported.as_deref())?;
                Ok(Bytes::new())
            }
            VERIFY_ACCESS_TOKEN => {
                let (client_id,): (String,) = inner.serializer.deserialize_args(payload)?;
                let exported = inner.bootstrap_interface();
                inner
                    .handshake
                    .verify_access(&client_id, exported.as_deref(), inner.access.as_ref())?;
                Ok(Bytes::new())
            }
            other => Err(ProtocolError::UnknownMethod {
                object_id: CHANNEL_OBJECT_ID,
                method_id: other,
            }),
        }
    }
}

impl std::fmt::Debug for DataChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataChannel")
            .field("role", &self.inner.role)
            .field("link", &self.link_state())
            .field("pending_calls", &self.pending_calls())
            .finish()
    }
}

fn check_interface(existing: &Proxy, wanted: &Arc<InterfaceDescriptor>) -> Result<Proxy> {
    if existing.interface().name() == wanted.name() {
        Ok(existing.clone())
    } else {
        Err(ProtocolError::InvalidArgument(format!(
            "object {} is already bound to {}, not {}",
            existing.object_id(),
            existing.interface().name(),
            wanted.name()
        )))
    }
}

/// Text carried by a failure reply.
fn failure_text(err: &ProtocolError) -> String {
    match err {
        ProtocolError::RemoteCall(text) | ProtocolError::AuthenticationError(text) => text.clone(),
        other => other.to_string(),
    }
}

async fn read_loop(channel: DataChannel, token: CancellationToken) {
    let inner = &channel.inner;
    let lost = loop {
        let next = tokio::select! {
            _ = token.cancelled() => break None,
            next = channel.next_frame() => next,
        };

        match next {
            Some(Ok(frame)) => {
                inner.metrics
                    .frame_received((LENGTH_PREFIX + frame.wire_len()) as u64);
                match Block::decode(frame) {
                    Ok(block) => channel.route(block),
                    Err(e) => {
                        inner.metrics.frame_discarded();
                        warn!(error = %e, "Discarding undecodable frame");
                    }
                }
            }
            Some(Err(e)) => break Some(e.to_string()),
            None => break Some("stream ended".to_string()),
        }
    };

    let failed = inner.tickets.fail_all();
    if let Some(reason) = lost {
        inner.reader.lock().await.take();
        inner.writer.lock().await.take();
        inner.set_detached(Some(Instant::now()));
        inner.metrics.link_lost();
        inner.link.send_replace(LinkState::Lost);
        warn!(reason = %reason, failed_calls = failed, "Link lost");
    } else {
        trace!(failed_calls = failed, "Read loop cancelled");
    }
}
