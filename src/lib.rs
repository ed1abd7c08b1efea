//! # objwire
//!
//! Identity-preserving object-graph serialization and a multiplexed object
//! RPC channel built on it.
//!
//! ## Layers
//! - [`core`]: primitive packing, the graph serializer and the frame codec
//! - [`protocol`]: blocks, interfaces, dispatch tables and the handshake
//! - [`service`]: the data channel, proxies, exported services, server and client
//! - [`transport`]: TCP and Unix sockets, session cache, service directory
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging and metrics
//!
//! ## Example
//! ```rust,no_run
//! use objwire::prelude::*;
//! use std::sync::Arc;
//!
//! struct Greeter;
//!
//! # async fn run() -> objwire::error::Result<()> {
//! let interface = Arc::new(InterfaceDescriptor::builder("IGreeter").method("SayHello").build()?);
//! let table = Arc::new(
//!     DispatchTable::<Greeter>::builder(Arc::clone(&interface))
//!         .method("SayHello", |_svc, (name,): (String,)| async move { Ok(format!("Hello {name}")) })
//!         .build()?,
//! );
//!
//! let (a, b) = tokio::io::duplex(64 * 1024);
//! let server = DataChannel::new(Role::Server, ChannelConfig::default())?;
//! server.export(Arc::new(Greeter), table)?;
//! server.attach(a).await?;
//!
//! let client = DataChannel::new(Role::Client, ChannelConfig::default())?;
//! client.attach(b).await?;
//! client.handshake("IGreeter", "alice").await?;
//!
//! let greeting: String = client
//!     .bootstrap_proxy(interface)?
//!     .call("SayHello", ("World!".to_string(),))
//!     .await?;
//! assert_eq!(greeting, "Hello World!");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

/// Commonly used types.
pub mod prelude {
    pub use crate::config::{ChannelConfig, NetworkConfig};
    pub use crate::core::graph::{Array, Dict, List, Obj};
    pub use crate::core::plan::{GraphObject, PlanBuilder};
    pub use crate::core::primitives::{Decimal, Timestamp};
    pub use crate::core::serialization::{Arguments, GraphValue, Serializer};
    pub use crate::error::{ProtocolError, Result};
    pub use crate::protocol::dispatcher::{CallContext, DispatchTable};
    pub use crate::protocol::handshake::AccessControl;
    pub use crate::protocol::interface::{InterfaceDescriptor, ObjectHandle};
    pub use crate::service::{Client, DataChannel, LinkState, Proxy, Role, Server, ServiceHandle};
}
