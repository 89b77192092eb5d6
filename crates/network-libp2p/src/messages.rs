//! Stream message names and payload schemas.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Handshake request, first message on every stream.
pub const HELLO: &str = "hello";
/// Handshake acknowledgement.
pub const OK: &str = "ok";
/// Graceful disconnect notice.
pub const BYE: &str = "bye";
/// Request for a sample of the peer's route table.
pub const SYNCROUTE: &str = "syncroute";
/// Route table sample, the reply to [`SYNCROUTE`].
pub const ROUTETABLE: &str = "routetable";
/// Reserved for duplicate-message reporting.
pub const RECVEDMSG: &str = "recvedmsg";

/// Payload for both `hello` and `ok` frames.
///
/// The advertised `node_id` must match the peer id the transport reports,
/// and `client_version` must pass the compatibility gate, or the receiving
/// side drops the connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    /// The sender's peer id in its printable base58 form.
    pub node_id: String,
    /// The sender's client version.
    pub client_version: String,
}

/// Entry in a [`Peers`] payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Peer id in its printable base58 form.
    pub id: String,
    /// Multiaddress strings the peer listens on.
    pub addrs: Vec<String>,
}

/// `routetable` payload: a sample of the sender's peer directory.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Peers {
    /// Advertised peers.
    pub peers: Vec<PeerInfo>,
}

/// A fully decoded application message handed to the net service.
#[derive(Clone, Debug)]
pub struct BaseMessage {
    name: String,
    peer_id: String,
    payload: Bytes,
}

impl BaseMessage {
    /// Bundle a decoded message with its origin.
    pub fn new(name: &str, peer_id: String, payload: Bytes) -> Self {
        Self { name: name.to_string(), peer_id, payload }
    }

    /// Message name from the frame header.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Printable peer id of the sender.
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Decompressed payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}
