//! Read and write loops plus per-frame dispatch.

use super::{
    codec::FrameDecoder,
    handshake, Frame, Stream, WriteLoopState,
};
use crate::{
    error::{StreamError, StreamResult},
    messages::{self, BaseMessage, PeerInfo, Peers},
    metrics,
    types::MessagePriority,
};
use futures::AsyncReadExt as _;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Read loop: dial if the transport is not attached yet, open with `hello`,
/// then accumulate bytes into frames and dispatch each one.
pub(crate) async fn read_loop(stream: Arc<Stream>) {
    if !stream.is_connected() {
        if let Err(e) = stream.connect().await {
            stream.close(&e).await;
            return;
        }
        if let Err(e) = stream.hello().await {
            stream.close(&e).await;
            return;
        }
    }

    let Some(mut reader) = stream.take_reader() else {
        stream.close(&StreamError::NotConnected).await;
        return;
    };

    let config = stream.node().stream_config().clone();
    let mut chunk = vec![0u8; config.read_chunk_size];
    let mut decoder = FrameDecoder::new(stream.node().chain_id(), config.max_payload_size);

    loop {
        let read = match reader.read(&mut chunk).await {
            Ok(0) => {
                let eof: StreamError = std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into();
                debug!(target: "network", stream = %stream, "peer closed the connection");
                stream.close(&eof).await;
                return;
            }
            Ok(read) => read,
            Err(e) => {
                debug!(target: "network", stream = %stream, err = %e, "error reading from network connection");
                stream.close(&e.into()).await;
                return;
            }
        };

        decoder.extend(&chunk[..read]);
        stream.note_read();

        loop {
            let frame = match decoder.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!(target: "network", stream = %stream, err = %e, "invalid frame, disconnecting");
                    stream.bye().await;
                    return;
                }
            };

            metrics::record_ingress_frame(frame.name(), frame.wire_len() as u64);

            if let Err(e) = handle_frame(&stream, frame).await {
                if matches!(e, StreamError::ShouldClose) {
                    stream.bye().await;
                    return;
                }
                debug!(target: "network", stream = %stream, err = %e, "message handler failed");
            }
        }
    }
}

/// Write loop: hold behind the handshake barrier (or give up after the
/// deadline), then drain the priority queues strict-highest-first, one frame
/// per notification.
pub(crate) async fn write_loop(stream: Arc<Stream>, mut state: WriteLoopState) {
    let deadline = sleep(stream.node().stream_config().handshake_timeout);
    tokio::pin!(deadline);

    tokio::select! {
        _ = &mut state.barrier_rx => {}
        _ = &mut state.quit_rx => {
            debug!(target: "network", stream = %stream, "quitting stream write loop");
            return;
        }
        _ = &mut deadline => {
            debug!(target: "network", stream = %stream, "stream handshake timed out, quitting");
            stream.close(&StreamError::HandshakeTimeout).await;
            return;
        }
    }

    loop {
        tokio::select! {
            _ = &mut state.quit_rx => {
                debug!(target: "network", stream = %stream, "quitting stream write loop");
                return;
            }
            Some(()) = state.notify_rx.recv() => {
                // write errors close the stream; the quit branch then exits
                if let Ok(frame) = state.high_rx.try_recv() {
                    let _ = stream.write_frame(&frame).await;
                    continue;
                }
                if let Ok(frame) = state.normal_rx.try_recv() {
                    let _ = stream.write_frame(&frame).await;
                    continue;
                }
                if let Ok(frame) = state.low_rx.try_recv() {
                    let _ = stream.write_frame(&frame).await;
                }
            }
        }
    }
}

/// Route one decoded frame.
///
/// Handshake names are handled in any state; everything else requires a
/// completed handshake. Returning [`StreamError::ShouldClose`] makes the
/// read loop send `bye` and exit; other errors are logged there and the
/// connection stays up.
async fn handle_frame(stream: &Arc<Stream>, frame: Frame) -> StreamResult<()> {
    stream.note_frame(&frame);
    let data = frame.uncompressed_payload()?;

    match frame.name() {
        messages::HELLO => handshake::on_hello(stream, &data).await,
        messages::OK => handshake::on_ok(stream, &data).await,
        messages::BYE => handshake::on_bye(stream),
        _ => {
            if !stream.is_handshake_succeed() {
                return Err(StreamError::ShouldClose);
            }
            match frame.name() {
                messages::SYNCROUTE => on_sync_route(stream).await,
                messages::ROUTETABLE => on_route_table(stream, &data),
                _ => {
                    let checksum = crc32fast::hash(&data);
                    stream.node().net_service().put_message(BaseMessage::new(
                        frame.name(),
                        stream.peer_id().to_string(),
                        data.clone(),
                    ));
                    stream.node().dedup().record_recv_message(stream, checksum);
                    Ok(())
                }
            }
        }
    }
}

/// Answer `syncroute` with a sample of our route table, excluding the asker.
async fn on_sync_route(stream: &Arc<Stream>) -> StreamResult<()> {
    let records = stream.node().route_table().random_peers(stream.peer_id());
    let msg = Peers {
        peers: records
            .iter()
            .map(|record| PeerInfo {
                id: record.id.to_string(),
                addrs: record.addrs.iter().map(|addr| addr.to_string()).collect(),
            })
            .collect(),
    };

    debug!(target: "network", stream = %stream, count = msg.peers.len(), "replying to route table sync");
    stream.send_typed(messages::ROUTETABLE, &msg, MessagePriority::High).await
}

/// Merge a `routetable` sample into the host's peer directory.
fn on_route_table(stream: &Arc<Stream>, data: &[u8]) -> StreamResult<()> {
    let peers: Peers = nx_types::try_decode(data).map_err(|e| {
        debug!(target: "network", stream = %stream, err = %e, "invalid peers message");
        StreamError::ShouldClose
    })?;

    stream.node().route_table().add_peers(stream.node().id(), &peers);
    Ok(())
}
