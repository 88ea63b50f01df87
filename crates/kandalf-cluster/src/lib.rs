//! Kandalf Cluster - leader election and leader-only worker control
//!
//! This crate provides:
//! - Raft consensus participant bootstrap (openraft engine, RocksDB log store,
//!   file snapshot store, TCP transport, JSON peer registry)
//! - Leadership notification channel fed by the engine's metrics
//! - Leadership watcher starting the worker on the leader node
//! - The cluster lifecycle loop driven by a liveness flag

#![allow(clippy::result_large_err)]

pub mod cluster;
pub mod error;
pub mod raft;

// Re-export commonly used types
pub use cluster::{
    ActiveWorker, Cluster, INFINITE_CYCLE_TIMEOUT, LeaderReceiver, LeaderSender,
    LeadershipWatcher, WatchOutcome, leader_channel,
};
pub use error::ClusterError;
pub use raft::config::ClusterSettings;
pub use raft::node::{BootstrapPolicy, ConsensusParticipant};
pub use raft::types::{NodeId, TypeConfig, node_id_for};
