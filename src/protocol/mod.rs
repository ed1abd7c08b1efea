//! # Protocol Layer
//!
//! Blocks exchanged over a data channel and the contracts that give them
//! meaning.
//!
//! ## Components
//! - **Block**: Call, Reply and Event headers on top of raw frames
//! - **Interface**: method and event id layout of a remotable contract
//! - **Dispatcher**: method-id routing into typed service handlers
//! - **Handshake**: channel-level interface and access verification
//!
//! ## Reserved Ids
//! - Object id `-1` addresses the channel itself, object id `0` the
//!   bootstrap service
//! - Method ids `900..` are channel methods: ping, verify-interface,
//!   verify-access-token

pub mod block;
pub mod dispatcher;
pub mod handshake;
pub mod interface;

#[cfg(test)]
mod tests;
