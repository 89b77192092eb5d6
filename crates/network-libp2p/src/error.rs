//! Error types for per-peer streams.

use thiserror::Error;

/// The result for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors raised on a per-peer stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Send was issued before the transport attached.
    #[error("stream is not connected")]
    NotConnected,
    /// Compressed payload could not be decompressed.
    #[error("uncompress message failed")]
    UncompressFailed,
    /// Fatal protocol violation; the connection must close and the loop exit.
    #[error("should close connection and exit loop")]
    ShouldClose,
    /// The peer did not complete the handshake in time.
    #[error("handshake timeout")]
    HandshakeTimeout,
    /// Frame carried a different chain tag than this node is configured for.
    #[error("chain id mismatch: ours {ours}, theirs {theirs}")]
    ChainIdMismatch {
        /// Chain id this node is configured with.
        ours: u32,
        /// Chain id found in the frame header.
        theirs: u32,
    },
    /// Header checksum did not match the header bytes.
    #[error("header checksum mismatch")]
    HeaderChecksum,
    /// Payload checksum did not match the payload bytes.
    #[error("payload checksum mismatch")]
    PayloadChecksum,
    /// Message name was empty, too long, or not printable ASCII.
    #[error("invalid message name")]
    InvalidMessageName,
    /// Declared payload length exceeds the configured cap.
    #[error("payload too large: {size} > {max}")]
    PayloadTooLarge {
        /// Length declared in the frame header.
        size: usize,
        /// Configured maximum payload size.
        max: usize,
    },
    /// Outbound queue receiver is gone; the stream already shut down.
    #[error("message queue closed")]
    QueueClosed,
    /// The per-message write deadline elapsed.
    #[error("write deadline elapsed")]
    WriteTimeout,
    /// Transport I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Payload (de)serialization failure.
    #[error(transparent)]
    Codec(#[from] nx_types::CodecError),
}
