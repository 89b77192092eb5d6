//! Host context shared by every stream.

use crate::types::{DedupLedger, Host, NetService, RouteTable, StreamRegistry};
use libp2p::PeerId;
use nx_config::{NetworkConfig, StreamConfig};
use nx_types::ChainId;
use std::sync::Arc;

/// Non-owning view of the host node a stream runs inside.
///
/// Streams hold this behind an `Arc`. The context never owns streams itself,
/// so no reference cycles form through the collaborators.
pub struct NodeContext {
    id: PeerId,
    config: NetworkConfig,
    host: Arc<dyn Host>,
    route_table: Arc<dyn RouteTable>,
    stream_registry: Arc<dyn StreamRegistry>,
    net_service: Arc<dyn NetService>,
    dedup: Arc<dyn DedupLedger>,
}

impl NodeContext {
    /// Bundle the local identity, configuration, and collaborator handles.
    pub fn new(
        id: PeerId,
        config: NetworkConfig,
        host: Arc<dyn Host>,
        route_table: Arc<dyn RouteTable>,
        stream_registry: Arc<dyn StreamRegistry>,
        net_service: Arc<dyn NetService>,
        dedup: Arc<dyn DedupLedger>,
    ) -> Self {
        Self { id, config, host, route_table, stream_registry, net_service, dedup }
    }

    /// Local peer id.
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// The chain tag carried in every frame this node produces.
    pub fn chain_id(&self) -> ChainId {
        self.config.chain_id
    }

    /// The client version advertised in handshakes.
    pub fn client_version(&self) -> &str {
        &self.config.client_version
    }

    /// Full network configuration.
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Stream tuning.
    pub fn stream_config(&self) -> &StreamConfig {
        &self.config.stream
    }

    pub(crate) fn host(&self) -> &dyn Host {
        &*self.host
    }

    pub(crate) fn route_table(&self) -> &dyn RouteTable {
        &*self.route_table
    }

    pub(crate) fn stream_registry(&self) -> &dyn StreamRegistry {
        &*self.stream_registry
    }

    pub(crate) fn net_service(&self) -> &dyn NetService {
        &*self.net_service
    }

    pub(crate) fn dedup(&self) -> &dyn DedupLedger {
        &*self.dedup
    }
}
