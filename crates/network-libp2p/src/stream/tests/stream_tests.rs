//! Stream lifecycle tests over in-memory duplex transports.

use crate::{
    error::StreamError,
    messages::{self, BaseMessage, Handshake, Peers},
    node::NodeContext,
    stream::{Frame, FrameDecoder, Stream, StreamStatus},
    types::{
        BoxedConduit, DedupLedger, Host, MessagePriority, NetService, PeerRecord, RouteTable,
        StreamRegistry,
    },
};
use futures::{AsyncReadExt as _, AsyncWriteExt as _};
use libp2p::{Multiaddr, PeerId, StreamProtocol};
use nx_config::NetworkConfig;
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::io::duplex;
use tokio_util::compat::TokioAsyncReadCompatExt as _;

const CHAIN: u32 = 1;

fn test_addr() -> Multiaddr {
    "/ip4/127.0.0.1/tcp/4001".parse().expect("valid multiaddr")
}

/// Two connected in-memory conduits, one per "node".
fn conduit_pair() -> (BoxedConduit, BoxedConduit) {
    let (a, b) = duplex(64 * 1024);
    (Box::new(a.compat()), Box::new(b.compat()))
}

/// Recording fake for every collaborator a stream talks to.
#[derive(Default)]
struct TestBench {
    added_peer_streams: Mutex<Vec<PeerId>>,
    removed_peer_streams: Mutex<Vec<PeerId>>,
    removed_streams: Mutex<Vec<PeerId>>,
    added_peers: Mutex<Vec<(PeerId, Peers)>>,
    serve_peers: Mutex<Vec<PeerRecord>>,
    messages: Mutex<Vec<(String, String, Vec<u8>)>>,
    recv_checksums: Mutex<Vec<u32>>,
    dial: Mutex<Option<BoxedConduit>>,
}

impl RouteTable for TestBench {
    fn add_peer_stream(&self, stream: &Arc<Stream>) {
        self.added_peer_streams.lock().push(*stream.peer_id());
    }

    fn remove_peer_stream(&self, stream: &Stream) {
        self.removed_peer_streams.lock().push(*stream.peer_id());
    }

    fn add_peers(&self, local: &PeerId, peers: &Peers) {
        self.added_peers.lock().push((*local, peers.clone()));
    }

    fn random_peers(&self, _exclude: &PeerId) -> Vec<PeerRecord> {
        self.serve_peers.lock().clone()
    }
}

impl StreamRegistry for TestBench {
    fn remove_stream(&self, stream: &Stream) {
        self.removed_streams.lock().push(*stream.peer_id());
    }
}

impl NetService for TestBench {
    fn put_message(&self, message: BaseMessage) {
        self.messages.lock().push((
            message.name().to_string(),
            message.peer_id().to_string(),
            message.payload().to_vec(),
        ));
    }
}

impl DedupLedger for TestBench {
    fn record_recv_message(&self, _stream: &Stream, checksum: u32) {
        self.recv_checksums.lock().push(checksum);
    }
}

#[async_trait::async_trait]
impl Host for TestBench {
    async fn new_stream(
        &self,
        _peer: PeerId,
        _protocol: StreamProtocol,
    ) -> std::io::Result<(BoxedConduit, Multiaddr)> {
        match self.dial.lock().take() {
            Some(conduit) => Ok((conduit, test_addr())),
            None => Err(std::io::Error::other("no conduit staged for dial")),
        }
    }
}

fn node_with(bench: &Arc<TestBench>, id: PeerId, config: NetworkConfig) -> Arc<NodeContext> {
    Arc::new(NodeContext::new(
        id,
        config,
        bench.clone(),
        bench.clone(),
        bench.clone(),
        bench.clone(),
        bench.clone(),
    ))
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Collect `count` frames arriving on a raw peer conduit.
async fn read_frames(peer: &mut BoxedConduit, decoder: &mut FrameDecoder, count: usize) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut chunk = [0u8; 4096];
    while frames.len() < count {
        let read = peer.read(&mut chunk).await.expect("peer read");
        assert!(read > 0, "peer connection closed early");
        decoder.extend(&chunk[..read]);
        while let Some(frame) = decoder.next_frame().expect("valid frame") {
            frames.push(frame);
        }
    }
    frames
}

/// Drive the handshake from a raw peer conduit acting as `peer_id`.
async fn send_hello(peer: &mut BoxedConduit, peer_id: &PeerId) {
    let hello = Handshake { node_id: peer_id.to_string(), client_version: "0.3.0".to_string() };
    let frame = Frame::encode(CHAIN, messages::HELLO, &nx_types::encode(&hello).expect("encodes"))
        .expect("frames");
    peer.write_all(&frame.to_wire()).await.expect("peer write");
}

/// A fully wired pair: A dials B, both handshake.
async fn handshaken_pair() -> (Arc<TestBench>, Arc<Stream>, Arc<TestBench>, Arc<Stream>) {
    let (a_end, b_end) = conduit_pair();
    let a_id = PeerId::random();
    let b_id = PeerId::random();

    let bench_a = Arc::new(TestBench::default());
    *bench_a.dial.lock() = Some(a_end);
    let stream_a = Stream::new_outbound(b_id, node_with(&bench_a, a_id, NetworkConfig::default()));

    let bench_b = Arc::new(TestBench::default());
    let stream_b = Stream::new_inbound(
        b_end,
        a_id,
        test_addr(),
        node_with(&bench_b, b_id, NetworkConfig::default()),
    );

    stream_a.clone().start();
    stream_b.clone().start();
    wait_for(|| stream_a.is_handshake_succeed() && stream_b.is_handshake_succeed()).await;

    (bench_a, stream_a, bench_b, stream_b)
}

#[tokio::test]
async fn handshake_completes_on_both_sides() {
    let (bench_a, stream_a, bench_b, stream_b) = handshaken_pair().await;

    assert_eq!(bench_a.added_peer_streams.lock().as_slice(), &[*stream_a.peer_id()]);
    assert_eq!(bench_b.added_peer_streams.lock().as_slice(), &[*stream_b.peer_id()]);
    assert!(stream_a.is_connected());
    assert!(stream_a.addr().is_some());
}

#[tokio::test]
async fn version_mismatch_closes_both_sides() {
    let (a_end, b_end) = conduit_pair();
    let a_id = PeerId::random();
    let b_id = PeerId::random();

    let bench_a = Arc::new(TestBench::default());
    *bench_a.dial.lock() = Some(a_end);
    let stream_a = Stream::new_outbound(b_id, node_with(&bench_a, a_id, NetworkConfig::default()));

    let mut old_config = NetworkConfig::default();
    old_config.client_version = "0.2.9".to_string();
    let bench_b = Arc::new(TestBench::default());
    let stream_b =
        Stream::new_inbound(b_end, a_id, test_addr(), node_with(&bench_b, b_id, old_config));

    stream_a.clone().start();
    stream_b.clone().start();

    wait_for(|| {
        bench_a.removed_streams.lock().len() == 1 && bench_b.removed_streams.lock().len() == 1
    })
    .await;
    assert_eq!(stream_a.status(), StreamStatus::Closed);
    assert_eq!(stream_b.status(), StreamStatus::Closed);
    assert!(bench_b.added_peer_streams.lock().is_empty());
}

#[tokio::test]
async fn chain_id_mismatch_closes_on_decode() {
    let (a_end, b_end) = conduit_pair();
    let a_id = PeerId::random();
    let b_id = PeerId::random();

    let bench_a = Arc::new(TestBench::default());
    *bench_a.dial.lock() = Some(a_end);
    let stream_a = Stream::new_outbound(b_id, node_with(&bench_a, a_id, NetworkConfig::default()));

    let mut other_chain = NetworkConfig::default();
    other_chain.chain_id = 2;
    let bench_b = Arc::new(TestBench::default());
    let stream_b =
        Stream::new_inbound(b_end, a_id, test_addr(), node_with(&bench_b, b_id, other_chain));

    stream_a.clone().start();
    stream_b.clone().start();

    wait_for(|| {
        stream_a.status() == StreamStatus::Closed && stream_b.status() == StreamStatus::Closed
    })
    .await;
    assert!(!stream_b.is_handshake_succeed());
}

#[tokio::test]
async fn application_message_before_handshake_closes() {
    let (mut peer, b_end) = conduit_pair();
    let peer_id = PeerId::random();

    let bench = Arc::new(TestBench::default());
    let stream = Stream::new_inbound(
        b_end,
        peer_id,
        test_addr(),
        node_with(&bench, PeerId::random(), NetworkConfig::default()),
    );
    stream.clone().start();

    let frame = Frame::encode(CHAIN, "blocks", b"too early").expect("frames");
    peer.write_all(&frame.to_wire()).await.expect("peer write");

    wait_for(|| bench.removed_streams.lock().len() == 1).await;
    assert_eq!(stream.status(), StreamStatus::Closed);

    // the stream said bye before closing
    let mut decoder = FrameDecoder::new(CHAIN, 1024 * 1024);
    let frames = read_frames(&mut peer, &mut decoder, 1).await;
    assert_eq!(frames[0].name(), messages::BYE);
}

#[tokio::test]
async fn wrong_advertised_node_id_closes() {
    let (mut peer, b_end) = conduit_pair();
    let peer_id = PeerId::random();

    let bench = Arc::new(TestBench::default());
    let stream = Stream::new_inbound(
        b_end,
        peer_id,
        test_addr(),
        node_with(&bench, PeerId::random(), NetworkConfig::default()),
    );
    stream.clone().start();

    // advertise an id that does not match the transport-reported peer
    send_hello(&mut peer, &PeerId::random()).await;

    wait_for(|| stream.status() == StreamStatus::Closed).await;
    assert!(bench.added_peer_streams.lock().is_empty());
}

#[tokio::test]
async fn high_priority_drains_before_lower() {
    let (mut peer, b_end) = conduit_pair();
    let peer_id = PeerId::random();

    let bench = Arc::new(TestBench::default());
    let stream = Stream::new_inbound(
        b_end,
        peer_id,
        test_addr(),
        node_with(&bench, PeerId::random(), NetworkConfig::default()),
    );
    stream.clone().start();

    // enqueue while the write loop is still parked behind the barrier
    stream.send_message("low1", b"l", MessagePriority::Low).await.expect("enqueue");
    stream.send_message("normal1", b"n", MessagePriority::Normal).await.expect("enqueue");
    stream.send_message("high1", b"h", MessagePriority::High).await.expect("enqueue");

    send_hello(&mut peer, &peer_id).await;

    // ok (direct write) interleaves with queue draining; only the relative
    // order of the queued three is guaranteed
    let mut decoder = FrameDecoder::new(CHAIN, 1024 * 1024);
    let frames = read_frames(&mut peer, &mut decoder, 4).await;
    let queued: Vec<_> =
        frames.iter().map(|f| f.name().to_string()).filter(|name| name != messages::OK).collect();
    assert_eq!(queued, ["high1", "normal1", "low1"]);
}

#[tokio::test]
async fn normal_queue_overflow_drops_silently() {
    let (mut peer, b_end) = conduit_pair();
    let peer_id = PeerId::random();

    let mut config = NetworkConfig::default();
    config.stream.queue_depth = 1;
    let bench = Arc::new(TestBench::default());
    let stream = Stream::new_inbound(
        b_end,
        peer_id,
        test_addr(),
        node_with(&bench, PeerId::random(), config),
    );
    stream.clone().start();

    stream.send_message("n1", b"first", MessagePriority::Normal).await.expect("enqueue");
    // lane is full; this drop is silent
    stream.send_message("n2", b"second", MessagePriority::Normal).await.expect("still ok");

    send_hello(&mut peer, &peer_id).await;

    let mut decoder = FrameDecoder::new(CHAIN, 1024 * 1024);
    let frames = read_frames(&mut peer, &mut decoder, 2).await;
    let names: Vec<_> =
        frames.iter().map(|f| f.name().to_string()).filter(|name| name != messages::OK).collect();
    assert_eq!(names, ["n1"]);

    // the lane drained, so a later message still flows
    stream.send_message("n3", b"third", MessagePriority::Normal).await.expect("enqueue");
    let frames = read_frames(&mut peer, &mut decoder, 1).await;
    assert_eq!(frames[0].name(), "n3");
}

#[tokio::test]
async fn handshake_timeout_closes_stream() {
    let (_peer, b_end) = conduit_pair();
    let peer_id = PeerId::random();

    let mut config = NetworkConfig::default();
    config.stream.handshake_timeout = Duration::from_millis(200);
    let bench = Arc::new(TestBench::default());
    let stream = Stream::new_inbound(
        b_end,
        peer_id,
        test_addr(),
        node_with(&bench, PeerId::random(), config),
    );
    stream.clone().start();

    wait_for(|| bench.removed_streams.lock().len() == 1).await;
    assert_eq!(stream.status(), StreamStatus::Closed);
    assert_eq!(bench.removed_peer_streams.lock().len(), 1);
}

#[tokio::test]
async fn close_is_idempotent_under_concurrent_callers() {
    let (_peer, b_end) = conduit_pair();
    let peer_id = PeerId::random();

    let bench = Arc::new(TestBench::default());
    let stream = Stream::new_inbound(
        b_end,
        peer_id,
        test_addr(),
        node_with(&bench, PeerId::random(), NetworkConfig::default()),
    );

    let other = stream.clone();
    tokio::join!(
        stream.close(&StreamError::ShouldClose),
        other.close(&StreamError::ShouldClose)
    );
    stream.close(&StreamError::ShouldClose).await;

    assert_eq!(stream.status(), StreamStatus::Closed);
    assert_eq!(bench.removed_streams.lock().len(), 1);
    assert_eq!(bench.removed_peer_streams.lock().len(), 1);
}

#[tokio::test]
async fn syncroute_exchange_updates_route_table() {
    let (bench_a, stream_a, bench_b, _stream_b) = handshaken_pair().await;

    let advertised = PeerRecord { id: PeerId::random(), addrs: vec![test_addr()] };
    *bench_b.serve_peers.lock() = vec![advertised.clone()];

    stream_a.sync_route().await.expect("syncroute enqueues");
    wait_for(|| !bench_a.added_peers.lock().is_empty()).await;

    let (local, peers) = bench_a.added_peers.lock()[0].clone();
    assert_eq!(local, *stream_a.node().id());
    assert_eq!(peers.peers.len(), 1);
    assert_eq!(peers.peers[0].id, advertised.id.to_string());
    assert_eq!(peers.peers[0].addrs, vec![test_addr().to_string()]);
}

#[tokio::test]
async fn application_messages_reach_net_service() {
    let (_bench_a, stream_a, bench_b, stream_b) = handshaken_pair().await;

    stream_a.send_message("blocks", b"block-1", MessagePriority::Normal).await.expect("enqueue");
    wait_for(|| !bench_b.messages.lock().is_empty()).await;

    let (name, peer, payload) = bench_b.messages.lock()[0].clone();
    assert_eq!(name, "blocks");
    assert_eq!(peer, stream_b.peer_id().to_string());
    assert_eq!(payload, b"block-1");
    assert_eq!(bench_b.recv_checksums.lock().as_slice(), &[crc32fast::hash(b"block-1")]);

    // observability maps update from the dispatcher
    assert_eq!(stream_b.message_counts().get("blocks"), Some(&1));
}

#[tokio::test]
async fn bye_closes_both_sides() {
    let (bench_a, stream_a, bench_b, stream_b) = handshaken_pair().await;

    stream_a.bye().await;

    wait_for(|| {
        bench_a.removed_streams.lock().len() == 1 && bench_b.removed_streams.lock().len() == 1
    })
    .await;
    assert_eq!(stream_a.status(), StreamStatus::Closed);
    assert_eq!(stream_b.status(), StreamStatus::Closed);
    assert_eq!(bench_a.removed_peer_streams.lock().len(), 1);
    assert_eq!(bench_b.removed_peer_streams.lock().len(), 1);
}

#[tokio::test]
async fn send_before_connect_fails_direct_write() {
    let bench = Arc::new(TestBench::default());
    let stream = Stream::new_outbound(
        PeerId::random(),
        node_with(&bench, PeerId::random(), NetworkConfig::default()),
    );

    let result = stream.write_message("blocks", b"data").await;
    assert!(matches!(result, Err(StreamError::NotConnected)));
    // a failed write closes the stream
    assert_eq!(stream.status(), StreamStatus::Closed);
}
