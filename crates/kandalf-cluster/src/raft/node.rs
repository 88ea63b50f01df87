// Consensus participant bootstrap
// Assembles storage, transport and peers into a running openraft instance

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Arc;

use kandalf_common::resolve_local_address;
use openraft::BasicNode;
use openraft::error::{InitializeError, RaftError};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::config::{ClusterSettings, host_port};
use super::log_store::RaftDbStore;
use super::peers::JsonPeerStore;
use super::snapshot::FileSnapshotStore;
use super::state_machine::NoopStateMachine;
use super::transport::TcpTransport;
use super::types::{NodeId, Raft, RaftMetrics, node_id_for};
use crate::cluster::leadership::{LeaderReceiver, leader_channel, observe_leadership};
use crate::error::ClusterError;

/// Election bootstrap policy derived from the seed peer list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPolicy {
    /// Lone node: becomes leader without waiting for votes
    SingleNode,
    /// Leader is chosen by a majority vote among the seed peers
    Majority,
}

impl BootstrapPolicy {
    /// Blank and repeated addresses do not count as extra peers
    pub fn from_peers(peers: &[String]) -> Self {
        let distinct: BTreeSet<&str> = peers
            .iter()
            .map(|peer| peer.trim())
            .filter(|peer| !peer.is_empty())
            .collect();

        if distinct.len() <= 1 {
            BootstrapPolicy::SingleNode
        } else {
            BootstrapPolicy::Majority
        }
    }

    pub fn is_single_node(&self) -> bool {
        matches!(self, BootstrapPolicy::SingleNode)
    }
}

/// This node's running consensus engine and everything it was built from
pub struct ConsensusParticipant {
    node_id: NodeId,
    addr: String,
    policy: BootstrapPolicy,
    raft: Raft,
    peers: JsonPeerStore,
    leader_rx: LeaderReceiver,
    server: JoinHandle<()>,
    observer: JoinHandle<()>,
}

impl ConsensusParticipant {
    /// Build and start the participant
    ///
    /// Nothing is returned on failure: every resource created before the
    /// failing step is released, and the error names the step.
    pub async fn bootstrap(
        settings: &ClusterSettings,
        peers: &[String],
    ) -> Result<Self, ClusterError> {
        let host = match settings.bind_host.as_deref() {
            Some(host) => host.to_string(),
            None => resolve_local_address().map_err(|e| {
                error!(stage = "resolve_local_address", error = %e, "Failed to find a local address");
                ClusterError::from(e)
            })?,
        };

        let bind = settings.bind_string(&host);
        let endpoint = resolve_endpoint(&bind).await.inspect_err(|e| {
            error!(stage = e.stage(), addr = %bind, error = %e, "Failed to resolve bind address");
        })?;

        let snapshot_dir = settings.snapshot_dir();
        let snapshots = FileSnapshotStore::new(&snapshot_dir, settings.nb_snapshot).map_err(|e| {
            error!(stage = "storage", path = %snapshot_dir.display(), error = %e, "Failed to create snapshot store");
            ClusterError::StorageInit {
                store: "snapshot",
                path: snapshot_dir.clone(),
                reason: e.to_string(),
            }
        })?;

        let db_path = settings.raft_db_path();
        let log_store = RaftDbStore::open(&db_path).await.map_err(|e| {
            error!(stage = "storage", path = %db_path.display(), error = %e, "Failed to create log store");
            ClusterError::StorageInit {
                store: "log",
                path: db_path.clone(),
                reason: e.to_string(),
            }
        })?;

        let state_machine = NoopStateMachine::open(snapshots).await.map_err(|e| {
            error!(stage = "storage", path = %snapshot_dir.display(), error = %e, "Failed to restore state machine");
            ClusterError::StorageInit {
                store: "snapshot",
                path: snapshot_dir.clone(),
                reason: e.to_string(),
            }
        })?;

        let transport =
            TcpTransport::bind(&endpoint.to_string(), settings.max_pool, settings.timeout)
                .await
                .inspect_err(|e| {
                    error!(stage = "transport", addr = %endpoint, error = %e, "Failed to create transport");
                })?;

        // Port 0 binds an ephemeral port; advertise the one actually bound
        let addr = if settings.bind_port == 0 {
            host_port(&host, transport.local_addr().port())
        } else {
            bind
        };
        let node_id = node_id_for(&addr);

        let peers_path = settings.peers_path();
        let peer_store = JsonPeerStore::open(&peers_path)
            .and_then(|store| store.set_peers(peers).map(|_| store))
            .map_err(|e| {
                error!(stage = "storage", path = %peers_path.display(), error = %e, "Failed to create peer store");
                ClusterError::StorageInit {
                    store: "peer",
                    path: peers_path.clone(),
                    reason: e.to_string(),
                }
            })?;

        let policy = BootstrapPolicy::from_peers(&peer_store.peers());
        let members = match policy {
            BootstrapPolicy::SingleNode => BTreeMap::from([(node_id, BasicNode::new(&addr))]),
            BootstrapPolicy::Majority => {
                let members = peer_store.members();
                if !members.contains_key(&node_id) {
                    let err = ClusterError::ConsensusInit(format!(
                        "local address {} is not in the peer list {:?}",
                        addr,
                        peer_store.peers()
                    ));
                    error!(stage = "consensus", node_id, addr = %addr, error = %err, "Invalid peer list");
                    return Err(err);
                }
                members
            }
        };

        let config = settings.to_openraft_config().validate().map_err(|e| {
            error!(stage = "consensus", error = %e, "Invalid consensus configuration");
            ClusterError::ConsensusInit(e.to_string())
        })?;

        let raft = Raft::new(
            node_id,
            Arc::new(config),
            transport.network_factory(),
            log_store,
            state_machine,
        )
        .await
        .map_err(|e| {
            error!(stage = "consensus", node_id, error = %e, "Failed to instantiate raft");
            ClusterError::ConsensusInit(e.to_string())
        })?;

        let (leader_tx, leader_rx) = leader_channel();
        let observer = observe_leadership(node_id, raft.metrics(), leader_tx);
        let server = transport.serve(raft.clone());

        match raft.initialize(members).await {
            Ok(()) => info!(node_id, ?policy, "Cluster membership initialized"),
            Err(RaftError::APIError(InitializeError::NotAllowed(_))) => {
                info!(node_id, "Existing raft state found, skipping initialization")
            }
            Err(e) => {
                error!(stage = "consensus", node_id, error = %e, "Failed to initialize cluster");
                server.abort();
                observer.abort();
                if let Err(shutdown_err) = raft.shutdown().await {
                    warn!(error = %shutdown_err, "Raft shutdown after failed initialization errored");
                }
                return Err(ClusterError::ConsensusInit(e.to_string()));
            }
        }

        info!(
            node_id,
            addr = %addr,
            single_node = policy.is_single_node(),
            data_dir = %settings.data_dir.display(),
            "Consensus participant started"
        );

        Ok(Self {
            node_id,
            addr,
            policy,
            raft,
            peers: peer_store,
            leader_rx,
            server,
            observer,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Advertised `host:port` of this node
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn bootstrap_policy(&self) -> BootstrapPolicy {
        self.policy
    }

    pub fn peers(&self) -> Vec<String> {
        self.peers.peers()
    }

    /// Receiver for leadership transitions of this node
    pub fn leader_ch(&self) -> LeaderReceiver {
        self.leader_rx.clone()
    }

    pub fn metrics(&self) -> RaftMetrics {
        self.raft.metrics().borrow().clone()
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.metrics().state, openraft::ServerState::Leader)
    }

    /// Stop the engine and the transport listener
    pub async fn shutdown(&self) {
        info!(node_id = self.node_id, "Shutting down consensus participant");

        self.server.abort();
        if let Err(e) = self.raft.shutdown().await {
            warn!(node_id = self.node_id, error = %e, "Raft shutdown returned an error");
        }
        self.observer.abort();

        info!(node_id = self.node_id, "Consensus participant stopped");
    }
}

/// Resolve `host:port` to a socket address
async fn resolve_endpoint(bind: &str) -> Result<SocketAddr, ClusterError> {
    let format_error = |reason: String| ClusterError::AddressFormat {
        addr: bind.to_string(),
        reason,
    };

    tokio::net::lookup_host(bind)
        .await
        .map_err(|e| format_error(e.to_string()))?
        .next()
        .ok_or_else(|| format_error("no address found".to_string()))
}
