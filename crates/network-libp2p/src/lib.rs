//! Per-peer stream protocol for the nexus network, built on libp2p
//! transport streams.
//!
//! Each connected peer gets one [`Stream`]: a framed, checksummed,
//! optionally-compressed conduit with a `hello`/`ok` handshake, three
//! strict-priority egress queues, and an idempotent close that unwinds both
//! loops and the host registrations.

pub mod error;
pub mod messages;
mod metrics;
mod node;
pub mod stream;
pub mod types;

pub use node::NodeContext;
pub use stream::{
    client_version_compatible, Frame, FrameDecoder, FrameHeader, Stream, StreamStatus,
    FRAME_HEADER_SIZE, MESSAGE_NAME_SIZE, NEXUS_STREAM_PROTOCOL,
};
pub use types::{
    BoxedConduit, Conduit, DedupLedger, Host, MessagePriority, NetService, PeerRecord, RouteTable,
    StreamRegistry,
};
