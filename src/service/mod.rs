//! # Service Layer
//!
//! The data channel and everything that lives on it.
//!
//! ## Components
//! - **Channel**: one multiplexed session over an attachable stream
//! - **Ticket**: pooled correlation records for outstanding calls
//! - **Objects**: exported services and their ids
//! - **Proxy**: local stand-ins for the peer's services
//! - **Server / Client**: session establishment, resumption and redial

pub mod channel;
pub mod client;
pub mod objects;
pub mod proxy;
pub mod server;
pub mod ticket;

pub use channel::{DataChannel, LinkState, Role};
pub use client::Client;
pub use objects::{ServiceHandle, ServiceItem};
pub use proxy::{Proxy, Subscription};
pub use server::Server;
