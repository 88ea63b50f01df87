// Raft state machine
// The coordinator replicates no application data; the machine only tracks what
// the engine needs to resume: the last applied log ID and the membership.

use std::io::Cursor;
use std::sync::Arc;

use openraft::storage::{RaftSnapshotBuilder, RaftStateMachine, Snapshot};
use openraft::{EntryPayload, ErrorSubject, ErrorVerb, OptionalSend, StorageError};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::snapshot::FileSnapshotStore;
use super::types::{
    ClusterResponse, Entry, LogId, NodeId, SnapshotMeta, StoredMembership, TypeConfig,
};

fn sm_error(
    e: impl std::error::Error + Send + Sync + 'static,
    verb: ErrorVerb,
) -> StorageError<NodeId> {
    StorageError::from_io_error(
        ErrorSubject::StateMachine,
        verb,
        std::io::Error::other(e.to_string()),
    )
}

async fn persist_snapshot(
    store: &FileSnapshotStore,
    meta: SnapshotMeta,
    data: Vec<u8>,
) -> Result<(), StorageError<NodeId>> {
    let store = store.clone();
    tokio::task::spawn_blocking(move || store.create(&meta, &data))
        .await
        .map_err(|e| sm_error(e, ErrorVerb::Write))?
        .map_err(|e| sm_error(e, ErrorVerb::Write))?;
    Ok(())
}

async fn load_latest_snapshot(
    store: &FileSnapshotStore,
) -> Result<Option<(SnapshotMeta, Vec<u8>)>, StorageError<NodeId>> {
    let store = store.clone();
    tokio::task::spawn_blocking(move || store.latest())
        .await
        .map_err(|e| sm_error(e, ErrorVerb::Read))?
        .map_err(|e| sm_error(e, ErrorVerb::Read))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AppliedState {
    last_applied: Option<LogId>,
    last_membership: StoredMembership,
}

/// State machine whose snapshots go through a [`FileSnapshotStore`]
#[derive(Clone)]
pub struct NoopStateMachine {
    state: Arc<RwLock<AppliedState>>,
    snapshots: FileSnapshotStore,
}

impl NoopStateMachine {
    /// Create the machine, resuming from the newest readable snapshot
    pub async fn open(snapshots: FileSnapshotStore) -> Result<Self, StorageError<NodeId>> {
        let state = match load_latest_snapshot(&snapshots).await? {
            Some((meta, _)) => {
                info!(
                    snapshot_id = %meta.snapshot_id,
                    last_log_id = ?meta.last_log_id,
                    "Restoring state machine from snapshot"
                );
                AppliedState {
                    last_applied: meta.last_log_id,
                    last_membership: meta.last_membership,
                }
            }
            None => AppliedState::default(),
        };

        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            snapshots,
        })
    }

    pub async fn last_applied(&self) -> Option<LogId> {
        self.state.read().await.last_applied
    }
}

impl RaftSnapshotBuilder<TypeConfig> for NoopStateMachine {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<NodeId>> {
        let state = self.state.read().await.clone();

        let snapshot_id = format!(
            "snapshot-{}-{}",
            state.last_applied.map(|l| l.index).unwrap_or(0),
            chrono::Utc::now().timestamp_millis()
        );
        let meta = SnapshotMeta {
            last_log_id: state.last_applied,
            last_membership: state.last_membership.clone(),
            snapshot_id,
        };

        let data = serde_json::to_vec(&state).map_err(|e| sm_error(e, ErrorVerb::Write))?;
        persist_snapshot(&self.snapshots, meta.clone(), data.clone()).await?;

        Ok(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}

impl RaftStateMachine<TypeConfig> for NoopStateMachine {
    type SnapshotBuilder = Self;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<LogId>, StoredMembership), StorageError<NodeId>> {
        let state = self.state.read().await;
        Ok((state.last_applied, state.last_membership.clone()))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<ClusterResponse>, StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry> + OptionalSend,
        I::IntoIter: OptionalSend,
    {
        let mut state = self.state.write().await;
        let mut responses = Vec::new();

        for entry in entries {
            if let EntryPayload::Membership(membership) = entry.payload {
                state.last_membership = StoredMembership::new(Some(entry.log_id), membership);
            }
            state.last_applied = Some(entry.log_id);
            responses.push(ClusterResponse);
        }

        debug!("Applied {} entries", responses.len());
        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        self.clone()
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<Cursor<Vec<u8>>>, StorageError<NodeId>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<NodeId>> {
        persist_snapshot(&self.snapshots, meta.clone(), snapshot.into_inner()).await?;

        let mut state = self.state.write().await;
        state.last_applied = meta.last_log_id;
        state.last_membership = meta.last_membership.clone();

        info!("Snapshot installed: {:?}", meta.snapshot_id);
        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, StorageError<NodeId>> {
        let latest = load_latest_snapshot(&self.snapshots).await?;

        Ok(latest.map(|(meta, data)| Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        }))
    }
}
