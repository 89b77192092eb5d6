//! Crate for configuring a node.
//!
//! Network-wide and per-stream tuning.

mod network;
pub use network::*;
