//! Collaborator seams and shared network types.
//!
//! The stream core talks to the rest of the node through these traits: the
//! host transport that opens raw streams, the peer directory, the stream
//! registry, and the message sink. Hosts wire in real implementations; tests
//! use recording fakes.

use crate::{
    messages::{BaseMessage, Peers},
    stream::Stream,
};
use async_trait::async_trait;
use futures::{AsyncRead, AsyncWrite};
use libp2p::{Multiaddr, PeerId, StreamProtocol};
use std::sync::Arc;

/// Priority lane for outbound messages.
///
/// The write loop drains lanes strict-highest-first on each wakeup; a
/// sustained stream of `High` messages starves the lower lanes so that
/// handshake and routing traffic is never delayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagePriority {
    /// Drained before everything else. Enqueue blocks when the lane is full.
    High,
    /// Default lane. Enqueue drops the message when the lane is full.
    Normal,
    /// Background traffic. Enqueue drops the message when the lane is full.
    Low,
}

/// A raw bidirectional byte stream to a peer.
///
/// `libp2p::Stream` satisfies this; tests use in-memory duplex pipes.
pub trait Conduit: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Conduit for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Boxed conduit handed out by the host transport.
pub type BoxedConduit = Box<dyn Conduit>;

/// Handle to the host transport for opening outbound streams.
#[async_trait]
pub trait Host: Send + Sync + 'static {
    /// Open a new bidirectional stream to `peer` speaking `protocol`.
    ///
    /// Returns the conduit together with the remote multiaddress the
    /// transport reports for the connection.
    async fn new_stream(
        &self,
        peer: PeerId,
        protocol: StreamProtocol,
    ) -> std::io::Result<(BoxedConduit, Multiaddr)>;
}

/// A peer directory entry advertised through `routetable` messages.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    /// Peer identity.
    pub id: PeerId,
    /// Addresses the peer listens on.
    pub addrs: Vec<Multiaddr>,
}

/// The peer directory collaborator.
pub trait RouteTable: Send + Sync + 'static {
    /// Track a stream that completed its handshake.
    ///
    /// Implementations that retain the stream should hold a `Weak` so the
    /// directory never keeps a closed stream alive.
    fn add_peer_stream(&self, stream: &Arc<Stream>);

    /// Drop a closing stream from the directory.
    fn remove_peer_stream(&self, stream: &Stream);

    /// Merge peers learned from a `routetable` message.
    fn add_peers(&self, local: &PeerId, peers: &Peers);

    /// Sample of peers to advertise, excluding the asking peer. The sample
    /// size is directory policy.
    fn random_peers(&self, exclude: &PeerId) -> Vec<PeerRecord>;
}

/// Registry of live streams kept by the host.
pub trait StreamRegistry: Send + Sync + 'static {
    /// Forget a stream that closed.
    fn remove_stream(&self, stream: &Stream);
}

/// Sink for fully decoded application messages.
pub trait NetService: Send + Sync + 'static {
    /// Hand a decoded message to the host for application-level dispatch.
    fn put_message(&self, message: BaseMessage);
}

/// Ledger recording received payload checksums for duplicate suppression.
pub trait DedupLedger: Send + Sync + 'static {
    /// Note that `stream` delivered a payload with the given CRC32.
    fn record_recv_message(&self, stream: &Stream, checksum: u32);
}
