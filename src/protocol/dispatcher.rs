//! # Dispatch Tables
//!
//! A [`DispatchTable`] routes inbound calls for one service type by method id.
//! Handlers are registered by method name against an
//! [`InterfaceDescriptor`]; each one deserializes its argument tuple, runs, and
//! serializes its return value.
//!
//! ```rust,no_run
//! use objwire::protocol::dispatcher::DispatchTable;
//! use objwire::protocol::interface::InterfaceDescriptor;
//! use std::sync::Arc;
//!
//! struct Greeter;
//!
//! let interface = Arc::new(
//!     InterfaceDescriptor::builder("IGreeter").method("SayHello").build().unwrap(),
//! );
//! let table = DispatchTable::<Greeter>::builder(interface)
//!     .method("SayHello", |_svc, (name,): (String,)| async move {
//!         Ok(format!("Hello {name}"))
//!     })
//!     .build()
//!     .unwrap();
//! assert_eq!(table.len(), 1);
//! ```

use crate::core::serialization::{Arguments, GraphValue, Serializer};
use crate::error::{ProtocolError, Result};
use crate::protocol::interface::{InterfaceDescriptor, ObjectHandle};
use crate::service::channel::DataChannel;
use crate::service::proxy::Proxy;
use bytes::Bytes;
use futures::future::{self, BoxFuture, FutureExt};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Boxed result of one method invocation: the serialized return value.
pub type MethodFuture = BoxFuture<'static, Result<Bytes>>;

type MethodFn<T> = Box<dyn Fn(Arc<T>, Bytes, CallContext) -> MethodFuture + Send + Sync>;

/// Method-id routing for services of type `T`.
pub struct DispatchTable<T> {
    interface: Arc<InterfaceDescriptor>,
    handlers: HashMap<i16, MethodFn<T>>,
}

impl<T: Send + Sync + 'static> DispatchTable<T> {
    pub fn builder(interface: Arc<InterfaceDescriptor>) -> DispatchBuilder<T> {
        DispatchBuilder {
            interface,
            handlers: HashMap::new(),
            error: None,
        }
    }

    pub fn interface(&self) -> &Arc<InterfaceDescriptor> {
        &self.interface
    }

    /// Number of methods with a handler.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn dispatch(
        &self,
        instance: Arc<T>,
        method_id: i16,
        payload: Bytes,
        ctx: CallContext,
    ) -> MethodFuture {
        match self.handlers.get(&method_id) {
            Some(handler) => handler(instance, payload, ctx),
            None => future::ready(Err(ProtocolError::UnknownMethod {
                object_id: ctx.object_id(),
                method_id,
            }))
            .boxed(),
        }
    }
}

/// Registers handlers; the first registration error is reported by `build`.
pub struct DispatchBuilder<T> {
    interface: Arc<InterfaceDescriptor>,
    handlers: HashMap<i16, MethodFn<T>>,
    error: Option<ProtocolError>,
}

impl<T: Send + Sync + 'static> DispatchBuilder<T> {
    /// Register a handler taking the service instance and its arguments.
    pub fn method<A, R, F, Fut>(self, name: &str, handler: F) -> Self
    where
        A: Arguments,
        R: GraphValue,
        F: Fn(Arc<T>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        self.method_ctx(name, move |instance, _ctx: CallContext, args| handler(instance, args))
    }

    /// Register a handler that also receives the [`CallContext`], for
    /// exporting or resolving live object references.
    pub fn method_ctx<A, R, F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        A: Arguments,
        R: GraphValue,
        F: Fn(Arc<T>, CallContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let method_id = match self.interface.method_id(name) {
            Ok(id) => id,
            Err(e) => {
                self.error.get_or_insert(e);
                return self;
            }
        };
        if self.handlers.contains_key(&method_id) {
            self.error.get_or_insert(ProtocolError::ConfigError(format!(
                "{}.{name} registered twice",
                self.interface.name()
            )));
            return self;
        }

        let method: MethodFn<T> = Box::new(move |instance: Arc<T>, payload: Bytes, ctx: CallContext| {
            let serializer = ctx.serializer().clone();
            let args = match serializer.deserialize_args::<A>(payload) {
                Ok(args) => args,
                Err(e) => return future::ready(Err(e)).boxed(),
            };
            let pending = handler(instance, ctx, args);
            async move {
                let value = pending.await?;
                serializer.serialize(&value)
            }
            .boxed()
        });
        self.handlers.insert(method_id, method);
        self
    }

    pub fn build(self) -> Result<DispatchTable<T>> {
        if let Some(e) = self.error {
            return Err(e);
        }
        Ok(DispatchTable {
            interface: self.interface,
            handlers: self.handlers,
        })
    }
}

/// A service instance bound to its dispatch table, as stored by the channel.
pub trait Dispatch: Send + Sync {
    fn interface(&self) -> &Arc<InterfaceDescriptor>;

    /// Address of the service instance, used to detect repeat exports.
    fn identity(&self) -> usize;

    /// The bound instance, for owner-side lookups by object id.
    fn instance(&self) -> Arc<dyn Any + Send + Sync>;

    fn invoke(&self, method_id: i16, payload: Bytes, ctx: CallContext) -> MethodFuture;
}

pub(crate) struct BoundService<T> {
    instance: Arc<T>,
    table: Arc<DispatchTable<T>>,
}

impl<T> BoundService<T> {
    pub(crate) fn new(instance: Arc<T>, table: Arc<DispatchTable<T>>) -> Self {
        Self { instance, table }
    }
}

impl<T: Send + Sync + 'static> Dispatch for BoundService<T> {
    fn interface(&self) -> &Arc<InterfaceDescriptor> {
        self.table.interface()
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.instance) as *const () as usize
    }

    fn instance(&self) -> Arc<dyn Any + Send + Sync> {
        Arc::clone(&self.instance) as Arc<dyn Any + Send + Sync>
    }

    fn invoke(&self, method_id: i16, payload: Bytes, ctx: CallContext) -> MethodFuture {
        self.table
            .dispatch(Arc::clone(&self.instance), method_id, payload, ctx)
    }
}

/// What a handler knows about the call it is serving.
#[derive(Clone)]
pub struct CallContext {
    channel: DataChannel,
    object_id: i16,
    method_id: i16,
    request_id: i32,
}

impl CallContext {
    pub(crate) fn new(channel: DataChannel, object_id: i16, method_id: i16, request_id: i32) -> Self {
        Self {
            channel,
            object_id,
            method_id,
            request_id,
        }
    }

    pub fn object_id(&self) -> i16 {
        self.object_id
    }

    pub fn method_id(&self) -> i16 {
        self.method_id
    }

    pub fn request_id(&self) -> i32 {
        self.request_id
    }

    pub fn serializer(&self) -> &Serializer {
        self.channel.serializer()
    }

    pub fn channel(&self) -> &DataChannel {
        &self.channel
    }

    /// Client id accepted during the handshake (server channels).
    pub fn client_id(&self) -> Option<String> {
        self.channel.client_id()
    }

    /// Export `instance` on this channel and return a handle the peer can resolve.
    pub fn export<S: Send + Sync + 'static>(
        &self,
        instance: Arc<S>,
        table: Arc<DispatchTable<S>>,
    ) -> Result<ObjectHandle> {
        self.channel
            .export(instance, table)
            .map(|service| ObjectHandle::new(service.object_id()))
    }

    /// Turn a handle received from the peer into a proxy; `None` for the null handle.
    pub fn resolve(
        &self,
        handle: ObjectHandle,
        interface: Arc<InterfaceDescriptor>,
    ) -> Result<Option<Proxy>> {
        self.channel.resolve(handle, interface)
    }

    /// Look up a handle that names one of this side's own exported objects,
    /// such as a proxy handle the peer passed back. `None` for the null handle
    /// or an id that is not exported here.
    ///
    /// # Errors
    /// `InvalidArgument` when the exported instance is not an `S`.
    pub fn local<S: Send + Sync + 'static>(&self, handle: ObjectHandle) -> Result<Option<Arc<S>>> {
        match self.channel.service(handle) {
            Some(item) => item.instance::<S>().map(Some).ok_or_else(|| {
                ProtocolError::InvalidArgument(format!(
                    "object {} is a {}, not the requested type",
                    item.object_id(),
                    item.interface().name()
                ))
            }),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("object_id", &self.object_id)
            .field("method_id", &self.method_id)
            .field("request_id", &self.request_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Calculator;

    fn interface() -> Arc<InterfaceDescriptor> {
        Arc::new(
            InterfaceDescriptor::builder("ICalc")
                .method("Add")
                .method("Negate")
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_unknown_method_name_fails_build() {
        let result = DispatchTable::<Calculator>::builder(interface())
            .method("Multiply", |_c, (a, b): (i32, i32)| async move { Ok(a * b) })
            .build();
        assert!(matches!(result, Err(ProtocolError::InvalidArgument(_))));
    }

    #[test]
    fn test_duplicate_registration_fails_build() {
        let result = DispatchTable::<Calculator>::builder(interface())
            .method("Add", |_c, (a, b): (i32, i32)| async move { Ok(a + b) })
            .method("Add", |_c, (a, b): (i32, i32)| async move { Ok(a - b) })
            .build();
        assert!(matches!(result, Err(ProtocolError::ConfigError(_))));
    }

    #[test]
    fn test_table_counts_handlers() {
        let table = DispatchTable::<Calculator>::builder(interface())
            .method("Add", |_c, (a, b): (i32, i32)| async move { Ok(a + b) })
            .method("Negate", |_c, (a,): (i64,)| async move { Ok(-a) })
            .build()
            .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.interface().name(), "ICalc");
    }
}
