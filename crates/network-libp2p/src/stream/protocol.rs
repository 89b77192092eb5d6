//! Wire protocol constants and the fixed-length frame header.

use crate::error::{StreamError, StreamResult};
use libp2p::StreamProtocol;

/// Stream protocol identifier negotiated with peers.
pub const NEXUS_STREAM_PROTOCOL: StreamProtocol = StreamProtocol::new("/nexus/1.0.0");

/// Size of the frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 32;

/// Width of the null-padded message-name field.
pub const MESSAGE_NAME_SIZE: usize = 12;

/// Bit in `reserved[0]` marking a snappy-compressed payload.
pub const COMPRESS_FLAG: u8 = 0x80;

/// Frame header, all integers big-endian:
///
/// ```text
/// +----------+--------------+-------------+-------------+----------+------------+
/// | chain_id | message name | payload_len | payload_crc | reserved | header_crc |
/// | 4 bytes  | 12 bytes     | 4 bytes     | 4 bytes     | 4 bytes  | 4 bytes    |
/// +----------+--------------+-------------+-------------+----------+------------+
/// ```
///
/// The message name is null-padded printable ASCII. `header_crc` is the
/// CRC32/IEEE of the preceding 28 bytes; `payload_crc` covers the payload
/// exactly as it appears on the wire (compressed when the flag is set).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Chain tag; frames from other chains are rejected.
    pub chain_id: u32,
    /// Message name, up to [`MESSAGE_NAME_SIZE`] ASCII bytes.
    pub message_name: String,
    /// Payload length in bytes, excluding the header.
    pub payload_len: u32,
    /// CRC32 of the payload bytes.
    pub payload_crc: u32,
    /// Reserved bytes; `reserved[0] & COMPRESS_FLAG` marks compression.
    pub reserved: [u8; 4],
}

impl FrameHeader {
    /// Build a header, validating the message name.
    pub fn new(
        chain_id: u32,
        message_name: &str,
        payload_len: u32,
        payload_crc: u32,
        reserved: [u8; 4],
    ) -> StreamResult<Self> {
        validate_message_name(message_name.as_bytes())?;
        Ok(Self {
            chain_id,
            message_name: message_name.to_string(),
            payload_len,
            payload_crc,
            reserved,
        })
    }

    /// Whether the payload was snappy-compressed by the sender.
    pub fn compressed(&self) -> bool {
        self.reserved[0] & COMPRESS_FLAG != 0
    }

    /// Encode the header, computing the trailing header CRC.
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.chain_id.to_be_bytes());
        buf[4..4 + self.message_name.len()].copy_from_slice(self.message_name.as_bytes());
        buf[16..20].copy_from_slice(&self.payload_len.to_be_bytes());
        buf[20..24].copy_from_slice(&self.payload_crc.to_be_bytes());
        buf[24..28].copy_from_slice(&self.reserved);
        let header_crc = crc32fast::hash(&buf[..28]);
        buf[28..32].copy_from_slice(&header_crc.to_be_bytes());
        buf
    }

    /// Decode a header, verifying the trailing header CRC.
    pub fn decode(buf: &[u8; FRAME_HEADER_SIZE]) -> StreamResult<Self> {
        let declared_crc = u32::from_be_bytes(buf[28..32].try_into().expect("4 bytes"));
        if crc32fast::hash(&buf[..28]) != declared_crc {
            return Err(StreamError::HeaderChecksum);
        }

        let chain_id = u32::from_be_bytes(buf[0..4].try_into().expect("4 bytes"));
        let message_name = parse_message_name(&buf[4..16])?;
        let payload_len = u32::from_be_bytes(buf[16..20].try_into().expect("4 bytes"));
        let payload_crc = u32::from_be_bytes(buf[20..24].try_into().expect("4 bytes"));
        let reserved = buf[24..28].try_into().expect("4 bytes");

        Ok(Self { chain_id, message_name, payload_len, payload_crc, reserved })
    }
}

fn validate_message_name(name: &[u8]) -> StreamResult<()> {
    if name.is_empty()
        || name.len() > MESSAGE_NAME_SIZE
        || !name.iter().all(|b| b.is_ascii_graphic())
    {
        return Err(StreamError::InvalidMessageName);
    }
    Ok(())
}

/// Extract the name from the fixed-width field: ASCII up to the first null,
/// with all padding bytes required to be null.
fn parse_message_name(raw: &[u8]) -> StreamResult<String> {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    let (name, padding) = raw.split_at(end);
    validate_message_name(name)?;
    if padding.iter().any(|b| *b != 0) {
        return Err(StreamError::InvalidMessageName);
    }
    String::from_utf8(name.to_vec()).map_err(|_| StreamError::InvalidMessageName)
}
