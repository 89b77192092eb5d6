//! Shared types and serialization helpers for the nexus network.

mod codec;
mod helpers;

pub use codec::*;
pub use helpers::*;

/// The 4-byte tag identifying a chain network on the wire.
pub type ChainId = u32;
