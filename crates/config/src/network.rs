//! Configuration for network variables.

use nx_types::ChainId;
use std::time::Duration;

/// Version string advertised during the stream handshake.
pub const CLIENT_VERSION: &str = "0.3.0";

/// The container for all network configurations.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Tag identifying this chain. Frames carrying any other tag are rejected.
    pub chain_id: ChainId,
    /// Version string this node advertises in `hello`/`ok`.
    pub client_version: String,
    /// Tuning for per-peer streams.
    pub stream: StreamConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            client_version: CLIENT_VERSION.to_string(),
            stream: StreamConfig::default(),
        }
    }
}

/// Configuration for per-peer stream behavior.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Maximum time to wait for the handshake before giving up on the peer.
    pub handshake_timeout: Duration,
    /// Chunk size for transport reads.
    pub read_chunk_size: usize,
    /// Depth of each outbound priority queue.
    pub queue_depth: usize,
    /// Depth of the advisory wakeup channel for the write loop.
    pub notify_depth: usize,
    /// Assumed minimum write throughput in bytes per second, used to derive
    /// per-message write deadlines.
    pub min_write_rate: usize,
    /// Hard cap on a single frame payload.
    pub max_payload_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            read_chunk_size: 4 * 1024,
            queue_depth: 2 * 1024,
            notify_depth: 6 * 1024,
            min_write_rate: 5 * 1024,
            max_payload_size: 10 * 1024 * 1024,
        }
    }
}
