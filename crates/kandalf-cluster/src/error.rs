//! Cluster bootstrap error types

use std::path::PathBuf;

use kandalf_common::ResolutionError;

/// Failure while constructing the consensus participant
///
/// Every variant is terminal for the participant being built: nothing
/// partially initialized is handed back to the caller.
#[derive(thiserror::Error, Debug)]
pub enum ClusterError {
    #[error("an error occurred while getting local address: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("an error occurred while resolving address '{addr}': {reason}")]
    AddressFormat { addr: String, reason: String },

    #[error("an error occurred while creating {store} storage at {path:?}: {reason}")]
    StorageInit {
        store: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("an error occurred while creating raft TCP transport on {addr}: {source}")]
    TransportInit {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("an error occurred while instantiating raft: {0}")]
    ConsensusInit(String),
}

impl ClusterError {
    /// Bootstrap stage the error belongs to, for structured logs
    pub fn stage(&self) -> &'static str {
        match self {
            ClusterError::Resolution(_) => "resolve_local_address",
            ClusterError::AddressFormat { .. } => "resolve_bind_address",
            ClusterError::StorageInit { .. } => "storage",
            ClusterError::TransportInit { .. } => "transport",
            ClusterError::ConsensusInit(_) => "consensus",
        }
    }
}
