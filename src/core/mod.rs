//! # Core Components
//!
//! Binary encoding of scalars and object graphs, plus the frame codec.
//!
//! ## Components
//! - **Packer**: fixed-width little-endian primitives and strings
//! - **Identity**: per-pass reference id caches
//! - **Plan / Graph / Serialization**: member plans, shared containers and the
//!   identity-preserving graph serializer
//! - **Frame / Codec**: length-prefixed frames over byte streams
//!
//! ## Wire Format
//! ```text
//! [Length(4)] [Kind(1)] [Header] [Payload]
//! ```
//!
//! ## Security
//! - Maximum frame size: 16MB by default (prevents memory exhaustion)
//! - Length and element counts validated before allocation

pub mod codec;
pub mod frame;
pub mod graph;
pub mod identity;
pub mod packer;
pub mod plan;
pub mod primitives;
pub mod serialization;
