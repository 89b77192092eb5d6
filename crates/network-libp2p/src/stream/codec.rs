//! Frame encoding and incremental decoding.
//!
//! Outbound messages are framed once at enqueue time. Inbound bytes arrive
//! in arbitrary chunks from the transport; [`FrameDecoder`] accumulates them
//! and yields complete frames, preserving partial frames across reads.

use super::protocol::{FrameHeader, COMPRESS_FLAG, FRAME_HEADER_SIZE};
use crate::{
    error::{StreamError, StreamResult},
    messages::HELLO,
};
use bytes::{Buf, Bytes, BytesMut};
use nx_types::ChainId;

/// One header+payload unit on the wire.
#[derive(Debug, Clone)]
pub struct Frame {
    header: FrameHeader,
    payload: Bytes,
}

impl Frame {
    /// Frame an outbound message.
    ///
    /// Everything except `hello` payloads is snappy-compressed, with the
    /// compression flag set in the reserved bytes. `hello` goes out raw so
    /// the handshake never depends on the peer's codec support.
    pub fn encode(chain_id: ChainId, message_name: &str, data: &[u8]) -> StreamResult<Self> {
        let (payload, reserved) = if message_name == HELLO {
            (Bytes::copy_from_slice(data), [0u8; 4])
        } else {
            let compressed = snap::raw::Encoder::new()
                .compress_vec(data)
                .map_err(std::io::Error::other)?;
            (Bytes::from(compressed), [COMPRESS_FLAG, 0, 0, 0])
        };

        let header = FrameHeader::new(
            chain_id,
            message_name,
            payload.len() as u32,
            crc32fast::hash(&payload),
            reserved,
        )?;
        Ok(Self { header, payload })
    }

    fn from_parts(header: FrameHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Message name from the header.
    pub fn name(&self) -> &str {
        &self.header.message_name
    }

    /// The parsed header.
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// Payload exactly as it appears on the wire.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Total wire length, header included.
    pub fn wire_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }

    /// Serialize for the transport.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Payload with any compression undone.
    ///
    /// `hello` payloads pass through untouched regardless of the flag.
    pub fn uncompressed_payload(&self) -> StreamResult<Bytes> {
        if self.name() == HELLO || !self.header.compressed() {
            return Ok(self.payload.clone());
        }
        let raw = snap::raw::Decoder::new()
            .decompress_vec(&self.payload)
            .map_err(|_| StreamError::UncompressFailed)?;
        Ok(Bytes::from(raw))
    }
}

/// Incremental decoder feeding frames out of a byte accumulator.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    pending: Option<FrameHeader>,
    chain_id: ChainId,
    max_payload_size: usize,
}

impl FrameDecoder {
    /// Decoder validating frames against this node's chain tag and payload cap.
    pub fn new(chain_id: ChainId, max_payload_size: usize) -> Self {
        Self { buffer: BytesMut::new(), pending: None, chain_id, max_payload_size }
    }

    /// Append bytes read from the transport.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Try to produce the next complete frame.
    ///
    /// `Ok(None)` means more bytes are needed. Errors are fatal to the
    /// connection: a frame that fails its checksums, carries the wrong chain
    /// tag, or oversteps the payload cap cannot be resynchronized past.
    pub fn next_frame(&mut self) -> StreamResult<Option<Frame>> {
        if self.pending.is_none() {
            if self.buffer.len() < FRAME_HEADER_SIZE {
                return Ok(None);
            }
            let mut raw = [0u8; FRAME_HEADER_SIZE];
            raw.copy_from_slice(&self.buffer[..FRAME_HEADER_SIZE]);
            let header = FrameHeader::decode(&raw)?;

            if header.chain_id != self.chain_id {
                return Err(StreamError::ChainIdMismatch {
                    ours: self.chain_id,
                    theirs: header.chain_id,
                });
            }
            if header.payload_len as usize > self.max_payload_size {
                return Err(StreamError::PayloadTooLarge {
                    size: header.payload_len as usize,
                    max: self.max_payload_size,
                });
            }

            self.buffer.advance(FRAME_HEADER_SIZE);
            self.pending = Some(header);
        }

        let payload_len = match &self.pending {
            Some(header) => header.payload_len as usize,
            None => return Ok(None),
        };
        if self.buffer.len() < payload_len {
            return Ok(None);
        }

        let Some(header) = self.pending.take() else { return Ok(None) };
        let payload = self.buffer.split_to(payload_len).freeze();
        if crc32fast::hash(&payload) != header.payload_crc {
            return Err(StreamError::PayloadChecksum);
        }

        Ok(Some(Frame::from_parts(header, payload)))
    }
}
