//! HELLO → OK handshake state machine.
//!
//! The dialing side sends `hello` right after the transport attaches; the
//! accepting side answers `ok`. Either side completing the exchange
//! validates the advertised identity and client version, registers the
//! stream with the route table, and releases the write loop barrier.

use super::Stream;
use crate::{
    error::{StreamError, StreamResult},
    messages::{self, Handshake},
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Strict string-equality client version gate.
///
/// Swap this out for a looser policy when mixed-version peers must
/// interoperate.
pub fn client_version_compatible(ours: &str, theirs: &str) -> bool {
    ours == theirs
}

impl Stream {
    /// Send the opening `hello`.
    pub(crate) async fn hello(&self) -> StreamResult<()> {
        let msg = Handshake {
            node_id: self.node().id().to_string(),
            client_version: self.node().client_version().to_string(),
        };
        self.write_typed(messages::HELLO, &msg).await
    }

    /// Acknowledge a valid `hello`.
    pub(crate) async fn ok(&self) -> StreamResult<()> {
        let msg = Handshake {
            node_id: self.node().id().to_string(),
            client_version: self.node().client_version().to_string(),
        };
        self.write_typed(messages::OK, &msg).await
    }
}

/// Peer opened with `hello`: validate, register, and answer `ok`.
pub(crate) async fn on_hello(stream: &Arc<Stream>, data: &[u8]) -> StreamResult<()> {
    verify_handshake(stream, data)?;
    finish_handshake(stream);
    stream.ok().await
}

/// Peer acknowledged our `hello`: validate and register, no further reply.
pub(crate) async fn on_ok(stream: &Arc<Stream>, data: &[u8]) -> StreamResult<()> {
    verify_handshake(stream, data)?;
    finish_handshake(stream);
    Ok(())
}

/// `bye` is accepted in any state and always tears the connection down.
pub(crate) fn on_bye(stream: &Stream) -> StreamResult<()> {
    debug!(target: "network", stream = %stream, "received bye, closing the connection");
    Err(StreamError::ShouldClose)
}

fn verify_handshake(stream: &Arc<Stream>, data: &[u8]) -> StreamResult<()> {
    let msg: Handshake = nx_types::try_decode(data).map_err(|_| StreamError::ShouldClose)?;

    // the transport already authenticated the peer id; checking the
    // advertised id against it again catches misconfigured peers early
    let ours = stream.node().client_version();
    if msg.node_id != stream.peer_id().to_string()
        || !client_version_compatible(ours, &msg.client_version)
    {
        warn!(
            target: "network",
            peer = %stream.peer_id(),
            node_id = %msg.node_id,
            client_version = %msg.client_version,
            "invalid node id or incompatible client version"
        );
        return Err(StreamError::ShouldClose);
    }

    stream.node().route_table().add_peer_stream(stream);
    Ok(())
}

fn finish_handshake(stream: &Arc<Stream>) {
    if stream.mark_handshake_succeeded() {
        debug!(target: "network", stream = %stream, "finished handshake");
    }
}
