// Raft consensus module for the Kandalf cluster
// Composes openraft with local storage, snapshots, peers and a TCP transport

pub mod config;
pub mod log_store;
pub mod network;
pub mod node;
pub mod peers;
pub mod snapshot;
pub mod state_machine;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use self::config::ClusterSettings;
pub use self::node::{BootstrapPolicy, ConsensusParticipant};
pub use self::types::{ClusterRequest, ClusterResponse, NodeId, Raft, RaftMetrics, TypeConfig, node_id_for};
