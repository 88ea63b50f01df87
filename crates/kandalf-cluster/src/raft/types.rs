// Raft type configuration for openraft
// Defines the application data carried by the log and the type aliases used across the crate

use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// Node ID type - derived from the node's `host:port` address
pub type NodeId = u64;

/// Commands replicated through the log
///
/// The replicated state machine is a placeholder: applying a command has no
/// observable effect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterRequest {
    Noop,
}

impl fmt::Display for ClusterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterRequest::Noop => write!(f, "noop"),
        }
    }
}

/// Result of applying a [`ClusterRequest`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterResponse;

openraft::declare_raft_types!(
    pub TypeConfig:
        D = ClusterRequest,
        R = ClusterResponse,
        Node = openraft::BasicNode,
        NodeId = NodeId,
);

/// Type alias for the Raft instance
pub type Raft = openraft::Raft<TypeConfig>;

/// Type alias for log entries
pub type Entry = openraft::Entry<TypeConfig>;

/// Type alias for log ID
pub type LogId = openraft::LogId<NodeId>;

/// Type alias for vote
pub type Vote = openraft::Vote<NodeId>;

/// Type alias for stored membership
pub type StoredMembership = openraft::StoredMembership<NodeId, openraft::BasicNode>;

/// Type alias for snapshot metadata
pub type SnapshotMeta = openraft::SnapshotMeta<NodeId, openraft::BasicNode>;

/// Type alias for metrics
pub type RaftMetrics = openraft::RaftMetrics<NodeId, openraft::BasicNode>;

/// Derive the node ID of a peer from its address
///
/// Uses the first eight bytes of the MD5 digest so that every node computes
/// the same ID for the same address, regardless of build or platform.
pub fn node_id_for(addr: &str) -> NodeId {
    let digest = Md5::digest(addr.as_bytes());
    BigEndian::read_u64(&digest[..8])
}
