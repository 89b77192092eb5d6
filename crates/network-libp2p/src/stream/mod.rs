//! Per-peer stream lifecycle.
//!
//! A [`Stream`] is the framed, prioritized conduit to one remote peer. Two
//! sibling tasks run per stream: the read loop accumulates bytes into frames
//! and dispatches them, the write loop waits behind the handshake barrier and
//! then drains three priority queues strict-highest-first. Closing is
//! idempotent and unwinds both loops, the transport, and the host
//! registrations.

mod codec;
mod handler;
mod handshake;
mod protocol;

#[cfg(test)]
#[path = "tests/stream_tests.rs"]
mod stream_tests;

pub use codec::{Frame, FrameDecoder};
pub use handshake::client_version_compatible;
pub use protocol::{
    FrameHeader, COMPRESS_FLAG, FRAME_HEADER_SIZE, MESSAGE_NAME_SIZE, NEXUS_STREAM_PROTOCOL,
};

use crate::{
    error::{StreamError, StreamResult},
    messages, metrics,
    node::NodeContext,
    types::{BoxedConduit, MessagePriority},
};
use futures::{
    io::{ReadHalf, WriteHalf},
    AsyncReadExt as _, AsyncWriteExt as _,
};
use libp2p::{Multiaddr, PeerId};
use nx_types::now_unix_secs;
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tracing::{debug, warn};

/// Stream status. Transitions are monotonic:
/// `Init` → `HandshakeSucceeded` → `Closed`, and `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamStatus {
    /// Created; handshake not yet complete.
    Init = 0,
    /// Both sides validated each other; application traffic flows.
    HandshakeSucceeded = 1,
    /// Torn down. Terminal.
    Closed = 2,
}

impl StreamStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Init,
            1 => Self::HandshakeSucceeded,
            _ => Self::Closed,
        }
    }
}

/// Receiver ends consumed by the write loop, taken once by [`Stream::start`].
pub(crate) struct WriteLoopState {
    pub(crate) barrier_rx: oneshot::Receiver<()>,
    pub(crate) quit_rx: oneshot::Receiver<()>,
    pub(crate) notify_rx: mpsc::Receiver<()>,
    pub(crate) high_rx: mpsc::Receiver<Frame>,
    pub(crate) normal_rx: mpsc::Receiver<Frame>,
    pub(crate) low_rx: mpsc::Receiver<Frame>,
}

/// The framed, multiplexed stream to one remote peer.
pub struct Stream {
    peer_id: PeerId,
    addr: Mutex<Option<Multiaddr>>,
    node: Arc<NodeContext>,

    status: AtomicU8,
    connected: AtomicBool,
    connected_at: i64,
    latest_read_at: AtomicI64,
    latest_write_at: AtomicI64,

    reader: Mutex<Option<ReadHalf<BoxedConduit>>>,
    writer: AsyncMutex<Option<WriteHalf<BoxedConduit>>>,

    high_tx: mpsc::Sender<Frame>,
    normal_tx: mpsc::Sender<Frame>,
    low_tx: mpsc::Sender<Frame>,
    notify_tx: mpsc::Sender<()>,
    write_state: Mutex<Option<WriteLoopState>>,

    barrier_tx: Mutex<Option<oneshot::Sender<()>>>,
    quit_tx: Mutex<Option<oneshot::Sender<()>>>,
    close_lock: AsyncMutex<()>,

    msg_count: Mutex<HashMap<String, u64>>,
    compress_flag: Mutex<HashMap<String, u8>>,
}

impl Stream {
    /// Stream for an accepted inbound connection, transport already attached.
    pub fn new_inbound(
        conduit: BoxedConduit,
        peer_id: PeerId,
        addr: Multiaddr,
        node: Arc<NodeContext>,
    ) -> Arc<Self> {
        Self::new_instance(peer_id, Some(addr), Some(conduit), node)
    }

    /// Stream for a peer this node dials when the read loop starts.
    pub fn new_outbound(peer_id: PeerId, node: Arc<NodeContext>) -> Arc<Self> {
        Self::new_instance(peer_id, None, None, node)
    }

    fn new_instance(
        peer_id: PeerId,
        addr: Option<Multiaddr>,
        conduit: Option<BoxedConduit>,
        node: Arc<NodeContext>,
    ) -> Arc<Self> {
        let config = node.stream_config();
        let (high_tx, high_rx) = mpsc::channel(config.queue_depth);
        let (normal_tx, normal_rx) = mpsc::channel(config.queue_depth);
        let (low_tx, low_rx) = mpsc::channel(config.queue_depth);
        let (notify_tx, notify_rx) = mpsc::channel(config.notify_depth);
        let (barrier_tx, barrier_rx) = oneshot::channel();
        let (quit_tx, quit_rx) = oneshot::channel();

        let (reader, writer) = match conduit {
            Some(conduit) => {
                let (reader, writer) = conduit.split();
                (Some(reader), Some(writer))
            }
            None => (None, None),
        };
        let connected = reader.is_some();

        Arc::new(Self {
            peer_id,
            addr: Mutex::new(addr),
            node,
            status: AtomicU8::new(StreamStatus::Init as u8),
            connected: AtomicBool::new(connected),
            connected_at: now_unix_secs(),
            latest_read_at: AtomicI64::new(0),
            latest_write_at: AtomicI64::new(0),
            reader: Mutex::new(reader),
            writer: AsyncMutex::new(writer),
            high_tx,
            normal_tx,
            low_tx,
            notify_tx,
            write_state: Mutex::new(Some(WriteLoopState {
                barrier_rx,
                quit_rx,
                notify_rx,
                high_rx,
                normal_rx,
                low_rx,
            })),
            barrier_tx: Mutex::new(Some(barrier_tx)),
            quit_tx: Mutex::new(Some(quit_tx)),
            close_lock: AsyncMutex::new(()),
            msg_count: Mutex::new(HashMap::new()),
            compress_flag: Mutex::new(HashMap::new()),
        })
    }

    /// Spawn the read and write loops. Call once per stream.
    pub fn start(self: Arc<Self>) {
        let state = self.write_state.lock().take();
        match state {
            Some(state) => {
                tokio::spawn(handler::write_loop(Arc::clone(&self), state));
                tokio::spawn(handler::read_loop(self));
            }
            None => debug!(target: "network", stream = %self, "stream already started"),
        }
    }

    /// Remote peer id.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Remote multiaddress, once the transport attached.
    pub fn addr(&self) -> Option<Multiaddr> {
        self.addr.lock().clone()
    }

    /// Current status.
    pub fn status(&self) -> StreamStatus {
        StreamStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Whether a transport is attached.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Whether the handshake completed.
    pub fn is_handshake_succeed(&self) -> bool {
        self.status() == StreamStatus::HandshakeSucceeded
    }

    /// Unix time the stream was created.
    pub fn connected_at(&self) -> i64 {
        self.connected_at
    }

    /// Unix time of the last successful transport read.
    pub fn latest_read_at(&self) -> i64 {
        self.latest_read_at.load(Ordering::Relaxed)
    }

    /// Unix time of the last successful transport write.
    pub fn latest_write_at(&self) -> i64 {
        self.latest_write_at.load(Ordering::Relaxed)
    }

    /// Snapshot of per-name received message counts.
    pub fn message_counts(&self) -> HashMap<String, u64> {
        self.msg_count.lock().clone()
    }

    /// Snapshot of the last-seen compression flag per peer key.
    pub fn compression_flags(&self) -> HashMap<String, u8> {
        self.compress_flag.lock().clone()
    }

    pub(crate) fn node(&self) -> &NodeContext {
        &self.node
    }

    pub(crate) fn take_reader(&self) -> Option<ReadHalf<BoxedConduit>> {
        self.reader.lock().take()
    }

    pub(crate) fn note_read(&self) {
        self.latest_read_at.store(now_unix_secs(), Ordering::Relaxed);
    }

    /// Record per-frame observability: the peer's compression flag and the
    /// per-name counter. Called from the dispatcher only.
    pub(crate) fn note_frame(&self, frame: &Frame) {
        let flag = frame.header().reserved[0] & COMPRESS_FLAG;
        self.compress_flag.lock().insert(self.peer_id.to_string(), flag);
        *self.msg_count.lock().entry(frame.name().to_string()).or_insert(0) += 1;
    }

    /// Move to `HandshakeSucceeded` and release the write loop. Returns
    /// whether this call made the transition; the barrier fires exactly once.
    pub(crate) fn mark_handshake_succeeded(&self) -> bool {
        let transitioned = self
            .status
            .compare_exchange(
                StreamStatus::Init as u8,
                StreamStatus::HandshakeSucceeded as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if transitioned {
            if let Some(barrier) = self.barrier_tx.lock().take() {
                let _ = barrier.send(());
            }
        }
        transitioned
    }

    /// Dial the peer through the host transport and attach the stream.
    pub async fn connect(&self) -> StreamResult<()> {
        debug!(target: "network", stream = %self, "connecting to peer");
        let (conduit, addr) = self
            .node
            .host()
            .new_stream(self.peer_id, NEXUS_STREAM_PROTOCOL)
            .await
            .inspect_err(|e| {
                debug!(target: "network", stream = %self, err = %e, "failed to open stream to peer")
            })?;

        let (reader, writer) = conduit.split();
        *self.reader.lock() = Some(reader);
        *self.writer.lock().await = Some(writer);
        *self.addr.lock() = Some(addr);
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    /// Frame `data` and enqueue it at `priority` for the write loop.
    ///
    /// `High` blocks until a queue slot frees up. `Normal` and `Low` drop the
    /// message when their lane is full; the drop is logged, not surfaced.
    pub async fn send_message(
        &self,
        message_name: &str,
        data: &[u8],
        priority: MessagePriority,
    ) -> StreamResult<()> {
        let frame = Frame::encode(self.node.chain_id(), message_name, data)?;

        match priority {
            MessagePriority::High => {
                self.high_tx.send(frame).await.map_err(|_| StreamError::QueueClosed)?;
            }
            MessagePriority::Normal => {
                if self.normal_tx.try_send(frame).is_err() {
                    debug!(
                        target: "network",
                        stream = %self,
                        name = message_name,
                        "normal priority queue full, dropping message"
                    );
                    return Ok(());
                }
            }
            MessagePriority::Low => {
                if self.low_tx.try_send(frame).is_err() {
                    debug!(
                        target: "network",
                        stream = %self,
                        name = message_name,
                        "low priority queue full, dropping message"
                    );
                    return Ok(());
                }
            }
        }

        // advisory wakeup; a full channel just means the write loop already
        // has plenty of pending notifications
        if self.notify_tx.try_send(()).is_err() {
            debug!(target: "network", stream = %self, "write loop notification channel full");
        }
        Ok(())
    }

    /// Serialize `message` and enqueue it at `priority`.
    pub async fn send_typed<M: Serialize>(
        &self,
        message_name: &str,
        message: &M,
        priority: MessagePriority,
    ) -> StreamResult<()> {
        let data = nx_types::encode(message).inspect_err(|e| {
            debug!(target: "network", stream = %self, name = message_name, err = %e, "failed to encode message")
        })?;
        self.send_message(message_name, &data, priority).await
    }

    /// Frame `data` and write it now, bypassing the priority queues.
    ///
    /// The handshake and `bye` use this to guarantee ordering.
    pub async fn write_message(&self, message_name: &str, data: &[u8]) -> StreamResult<()> {
        let frame = Frame::encode(self.node.chain_id(), message_name, data)?;
        self.write_frame(&frame).await
    }

    /// Serialize `message` and write it now, bypassing the priority queues.
    pub async fn write_typed<M: Serialize>(
        &self,
        message_name: &str,
        message: &M,
    ) -> StreamResult<()> {
        let data = nx_types::encode(message).inspect_err(|e| {
            debug!(target: "network", stream = %self, name = message_name, err = %e, "failed to encode message")
        })?;
        self.write_message(message_name, &data).await
    }

    /// Write an already-framed message to the transport.
    pub(crate) async fn write_frame(&self, frame: &Frame) -> StreamResult<()> {
        metrics::record_egress_message(frame.name(), frame.wire_len() as u64);
        self.write(&frame.to_wire()).await
    }

    /// Write raw bytes under the per-message deadline. Any failure closes
    /// the stream.
    async fn write(&self, data: &[u8]) -> StreamResult<()> {
        match self.write_inner(data).await {
            Ok(written) => {
                self.latest_write_at.store(now_unix_secs(), Ordering::Relaxed);
                metrics::record_write(written as u64);
                Ok(())
            }
            Err(e) => {
                warn!(target: "network", stream = %self, err = %e, "failed to send message to peer");
                self.close(&e).await;
                Err(e)
            }
        }
    }

    async fn write_inner(&self, data: &[u8]) -> StreamResult<usize> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(StreamError::NotConnected)?;

        let deadline = write_deadline(data.len(), self.node.stream_config().min_write_rate);
        match tokio::time::timeout(deadline, writer.write_all(data)).await {
            Ok(Ok(())) => Ok(data.len()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(StreamError::WriteTimeout),
        }
    }

    /// Ask the peer for a sample of its route table.
    pub async fn sync_route(&self) -> StreamResult<()> {
        self.send_message(messages::SYNCROUTE, &[], MessagePriority::High).await
    }

    /// Best-effort `bye`, then close.
    pub async fn bye(&self) {
        let _ = self.write_message(messages::BYE, &[]).await;
        self.close(&StreamError::ShouldClose).await;
    }

    /// Tear the stream down: deregister from the stream registry and route
    /// table, stop the write loop, and close the transport. Safe to call
    /// repeatedly and from concurrent tasks; only the first call acts.
    pub async fn close(&self, reason: &StreamError) {
        let _guard = self.close_lock.lock().await;
        if self.status() == StreamStatus::Closed {
            return;
        }
        self.status.store(StreamStatus::Closed as u8, Ordering::Release);

        debug!(target: "network", stream = %self, %reason, "closing stream");

        self.node.stream_registry().remove_stream(self);
        self.node.route_table().remove_peer_stream(self);

        if let Some(quit) = self.quit_tx.lock().take() {
            let _ = quit.send(());
        }

        // transport errors during teardown are irrelevant
        let mut guard = self.writer.lock().await;
        if let Some(mut writer) = guard.take() {
            let _ = writer.close().await;
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addr = self.addr.lock();
        match addr.as_ref() {
            Some(addr) => write!(f, "peer stream: {},{addr}", self.peer_id),
            None => write!(f, "peer stream: {},", self.peer_id),
        }
    }
}

/// Per-message write deadline: length-proportional with a floor of one
/// second at `rate` bytes per second.
fn write_deadline(len: usize, rate: usize) -> Duration {
    Duration::from_secs(len.div_ceil(rate.max(1)).max(1) as u64)
}
