// RocksDB-based log and stable storage for Raft
// A single database file holds both the replicated log and the persisted vote

// Allow large error types - StorageError is from openraft and follows their design patterns
#![allow(clippy::result_large_err)]

use std::fmt::Debug;
use std::ops::{Bound, RangeBounds};
use std::path::Path;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use openraft::storage::{LogFlushed, LogState, RaftLogStorage};
use openraft::{ErrorSubject, ErrorVerb, OptionalSend, RaftLogReader, StorageError};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions,
};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::types::{Entry, LogId, NodeId, TypeConfig, Vote};

// Column family names
const CF_LOGS: &str = "logs";
const CF_STATE: &str = "state";

// State keys
const KEY_VOTE: &[u8] = b"vote";
const KEY_LAST_PURGED: &[u8] = b"last_purged";

fn vote_error(
    e: impl std::error::Error + Send + Sync + 'static,
    verb: ErrorVerb,
) -> StorageError<NodeId> {
    StorageError::from_io_error(
        ErrorSubject::Vote,
        verb,
        std::io::Error::other(e.to_string()),
    )
}

fn logs_error(
    e: impl std::error::Error + Send + Sync + 'static,
    verb: ErrorVerb,
) -> StorageError<NodeId> {
    StorageError::from_io_error(
        ErrorSubject::Logs,
        verb,
        std::io::Error::other(e.to_string()),
    )
}

/// Every mutation is fsynced before it is acknowledged
fn durable_write_options() -> WriteOptions {
    let mut opts = WriteOptions::default();
    opts.set_sync(true);
    opts
}

/// Combined log store and stable store backed by one RocksDB database
///
/// Entries live in the `logs` column family keyed by big-endian index, so
/// iteration order equals log order. The vote and the purge marker live in
/// the `state` column family.
pub struct RaftDbStore {
    db: Arc<DB>,
    last_log_id: RwLock<Option<LogId>>,
    vote: RwLock<Option<Vote>>,
    last_purged: RwLock<Option<LogId>>,
}

impl RaftDbStore {
    /// Open (or create) the store at `path`
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError<NodeId>> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_LOGS, Options::default()),
            ColumnFamilyDescriptor::new(CF_STATE, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cfs)
            .map_err(|e| logs_error(e, ErrorVerb::Read))?;

        let store = Self {
            db: Arc::new(db),
            last_log_id: RwLock::new(None),
            vote: RwLock::new(None),
            last_purged: RwLock::new(None),
        };
        store.load_cached_values().await?;

        info!(path = %path.as_ref().display(), "Raft log store opened");
        Ok(store)
    }

    async fn load_cached_values(&self) -> Result<(), StorageError<NodeId>> {
        *self.vote.write().await = self.read_json(KEY_VOTE, ErrorSubject::Vote)?;

        let last_purged: Option<LogId> = self.read_json(KEY_LAST_PURGED, ErrorSubject::Logs)?;
        *self.last_purged.write().await = last_purged;

        let last_log_id = self.last_stored_log_id()?.or(last_purged);
        *self.last_log_id.write().await = last_log_id;

        Ok(())
    }

    /// Panics only if the column family vanished, which means the database is corrupted
    fn cf_logs(&self) -> &ColumnFamily {
        self.db
            .cf_handle(CF_LOGS)
            .expect("CF_LOGS must exist - database may be corrupted")
    }

    fn cf_state(&self) -> &ColumnFamily {
        self.db
            .cf_handle(CF_STATE)
            .expect("CF_STATE must exist - database may be corrupted")
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), rocksdb::Error> {
        self.db.write_opt(batch, &durable_write_options())
    }

    fn put_state(&self, key: &[u8], value: Vec<u8>) -> Result<(), rocksdb::Error> {
        self.db
            .put_cf_opt(self.cf_state(), key, value, &durable_write_options())
    }

    fn encode_index(index: u64) -> [u8; 8] {
        let mut buf = [0u8; 8];
        BigEndian::write_u64(&mut buf, index);
        buf
    }

    fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &[u8],
        subject: ErrorSubject<NodeId>,
    ) -> Result<Option<T>, StorageError<NodeId>> {
        let to_error = |e: String| {
            StorageError::from_io_error(subject.clone(), ErrorVerb::Read, std::io::Error::other(e))
        };

        match self.db.get_cf(self.cf_state(), key) {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| to_error(e.to_string())),
            Ok(None) => Ok(None),
            Err(e) => Err(to_error(e.to_string())),
        }
    }

    fn serialize_entry(entry: &Entry) -> Result<Vec<u8>, StorageError<NodeId>> {
        serde_json::to_vec(entry).map_err(|e| logs_error(e, ErrorVerb::Write))
    }

    fn deserialize_entry(bytes: &[u8]) -> Result<Entry, StorageError<NodeId>> {
        serde_json::from_slice(bytes).map_err(|e| logs_error(e, ErrorVerb::Read))
    }

    /// Log ID of the entry with the highest index still stored
    fn last_stored_log_id(&self) -> Result<Option<LogId>, StorageError<NodeId>> {
        let mut iter = self.db.raw_iterator_cf(self.cf_logs());
        iter.seek_to_last();

        if iter.valid()
            && let Some(value) = iter.value()
        {
            return Ok(Some(Self::deserialize_entry(value)?.log_id));
        }

        iter.status().map_err(|e| logs_error(e, ErrorVerb::Read))?;
        Ok(None)
    }

    /// Delete stored entries with `start <= index < end_exclusive`
    fn delete_range(
        &self,
        start: u64,
        end_exclusive: Option<u64>,
    ) -> Result<usize, StorageError<NodeId>> {
        let start_key = Self::encode_index(start);
        let mut batch = WriteBatch::default();
        let mut removed = 0;

        let iter = self.db.iterator_cf(
            self.cf_logs(),
            IteratorMode::From(&start_key, Direction::Forward),
        );
        for item in iter {
            let (key, _) = item.map_err(|e| logs_error(e, ErrorVerb::Read))?;
            if let Some(end) = end_exclusive
                && BigEndian::read_u64(&key) >= end
            {
                break;
            }
            batch.delete_cf(self.cf_logs(), key);
            removed += 1;
        }

        self.write_batch(batch)
            .map_err(|e| logs_error(e, ErrorVerb::Delete))?;
        Ok(removed)
    }
}

impl RaftLogReader<TypeConfig> for RaftDbStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + OptionalSend>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry>, StorageError<NodeId>> {
        let start = match range.start_bound() {
            Bound::Included(&n) => n,
            Bound::Excluded(&n) => n + 1,
            Bound::Unbounded => 0,
        };

        let start_key = Self::encode_index(start);
        let mut entries = Vec::new();

        let iter = self.db.iterator_cf(
            self.cf_logs(),
            IteratorMode::From(&start_key, Direction::Forward),
        );
        for item in iter {
            let (key, value) = item.map_err(|e| logs_error(e, ErrorVerb::Read))?;
            if !range.contains(&BigEndian::read_u64(&key)) {
                break;
            }
            entries.push(Self::deserialize_entry(&value)?);
        }

        debug!("Read {} log entries from range {:?}", entries.len(), range);
        Ok(entries)
    }
}

impl RaftLogStorage<TypeConfig> for RaftDbStore {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<NodeId>> {
        Ok(LogState {
            last_purged_log_id: *self.last_purged.read().await,
            last_log_id: *self.last_log_id.read().await,
        })
    }

    async fn save_vote(&mut self, vote: &Vote) -> Result<(), StorageError<NodeId>> {
        let bytes = serde_json::to_vec(vote).map_err(|e| vote_error(e, ErrorVerb::Write))?;
        self.put_state(KEY_VOTE, bytes)
            .map_err(|e| vote_error(e, ErrorVerb::Write))?;

        *self.vote.write().await = Some(*vote);
        debug!("Saved vote: {:?}", vote);
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<Vote>, StorageError<NodeId>> {
        Ok(*self.vote.read().await)
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        RaftDbStore {
            db: self.db.clone(),
            last_log_id: RwLock::new(*self.last_log_id.read().await),
            vote: RwLock::new(*self.vote.read().await),
            last_purged: RwLock::new(*self.last_purged.read().await),
        }
    }

    async fn append<I>(
        &mut self,
        entries: I,
        callback: LogFlushed<TypeConfig>,
    ) -> Result<(), StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry> + OptionalSend,
        I::IntoIter: OptionalSend,
    {
        let mut batch = WriteBatch::default();
        let mut last_log_id = None;
        let mut count = 0usize;

        for entry in entries {
            batch.put_cf(
                self.cf_logs(),
                Self::encode_index(entry.log_id.index),
                Self::serialize_entry(&entry)?,
            );
            last_log_id = Some(entry.log_id);
            count += 1;
        }

        if count > 0 {
            self.write_batch(batch)
                .map_err(|e| logs_error(e, ErrorVerb::Write))?;
        }

        if let Some(log_id) = last_log_id {
            *self.last_log_id.write().await = Some(log_id);
        }

        debug!("Appended {} log entries", count);
        callback.log_io_completed(Ok(()));
        Ok(())
    }

    async fn truncate(&mut self, log_id: LogId) -> Result<(), StorageError<NodeId>> {
        let removed = self.delete_range(log_id.index, None)?;

        let last = self.last_stored_log_id()?.or(*self.last_purged.read().await);
        *self.last_log_id.write().await = last;

        debug!("Truncated {} log entries since index {}", removed, log_id.index);
        Ok(())
    }

    async fn purge(&mut self, log_id: LogId) -> Result<(), StorageError<NodeId>> {
        let removed = self.delete_range(0, Some(log_id.index + 1))?;

        let bytes = serde_json::to_vec(&log_id).map_err(|e| logs_error(e, ErrorVerb::Write))?;
        self.put_state(KEY_LAST_PURGED, bytes)
            .map_err(|e| logs_error(e, ErrorVerb::Write))?;

        *self.last_purged.write().await = Some(log_id);

        let mut last_log_id = self.last_log_id.write().await;
        if last_log_id.is_none_or(|last| last.index < log_id.index) {
            *last_log_id = Some(log_id);
        }

        debug!("Purged {} log entries up to index {}", removed, log_id.index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use openraft::{CommittedLeaderId, EntryPayload};
    use tempfile::TempDir;

    use crate::raft::types::ClusterRequest;

    fn log_id(term: u64, index: u64) -> LogId {
        LogId::new(CommittedLeaderId::new(term, 1), index)
    }

    fn entry(term: u64, index: u64) -> Entry {
        Entry {
            log_id: log_id(term, index),
            payload: EntryPayload::Normal(ClusterRequest::Noop),
        }
    }

    /// Write entries straight into the column family, bypassing `append`
    fn seed(store: &RaftDbStore, entries: &[Entry]) {
        for entry in entries {
            store
                .db
                .put_cf(
                    store.cf_logs(),
                    RaftDbStore::encode_index(entry.log_id.index),
                    RaftDbStore::serialize_entry(entry).unwrap(),
                )
                .unwrap();
        }
    }

    async fn open_store() -> (RaftDbStore, TempDir) {
        let tmp_dir = TempDir::new().unwrap();
        let store = RaftDbStore::open(tmp_dir.path().join("raft.db")).await.unwrap();
        (store, tmp_dir)
    }

    #[test]
    fn test_encode_index_ordering() {
        let indices = [0u64, 1, 255, 256, 1000, u64::MAX];
        let encoded: Vec<_> = indices.iter().map(|&i| RaftDbStore::encode_index(i)).collect();

        for pair in encoded.windows(2) {
            assert!(pair[0] < pair[1], "Encoding should preserve ordering");
        }
    }

    #[tokio::test]
    async fn test_empty_store_state() {
        let (mut store, _tmp_dir) = open_store().await;

        let state = store.get_log_state().await.unwrap();
        assert_eq!(state.last_log_id, None);
        assert_eq!(state.last_purged_log_id, None);
        assert_eq!(store.read_vote().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_vote_survives_reopen() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("raft.db");
        let vote = Vote::new(3, 42);

        {
            let mut store = RaftDbStore::open(&path).await.unwrap();
            store.save_vote(&vote).await.unwrap();
        }

        let mut store = RaftDbStore::open(&path).await.unwrap();
        assert_eq!(store.read_vote().await.unwrap(), Some(vote));
    }

    #[tokio::test]
    async fn test_read_range() {
        let (mut store, _tmp_dir) = open_store().await;
        seed(&store, &(1..=5).map(|i| entry(1, i)).collect::<Vec<_>>());

        let entries = store.try_get_log_entries(2..4).await.unwrap();
        let indices: Vec<u64> = entries.iter().map(|e| e.log_id.index).collect();
        assert_eq!(indices, vec![2, 3]);

        let entries = store.try_get_log_entries(4..).await.unwrap();
        assert_eq!(entries.len(), 2);

        let entries = store.try_get_log_entries(..=1).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_truncate_is_inclusive() {
        let (mut store, _tmp_dir) = open_store().await;
        seed(&store, &(1..=5).map(|i| entry(1, i)).collect::<Vec<_>>());

        store.truncate(log_id(1, 3)).await.unwrap();

        let entries = store.try_get_log_entries(..).await.unwrap();
        let indices: Vec<u64> = entries.iter().map(|e| e.log_id.index).collect();
        assert_eq!(indices, vec![1, 2]);
        assert_eq!(
            store.get_log_state().await.unwrap().last_log_id,
            Some(log_id(1, 2))
        );
    }

    #[tokio::test]
    async fn test_purge_keeps_marker() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("raft.db");

        {
            let mut store = RaftDbStore::open(&path).await.unwrap();
            seed(&store, &(1..=4).map(|i| entry(2, i)).collect::<Vec<_>>());
            store.purge(log_id(2, 2)).await.unwrap();

            let entries = store.try_get_log_entries(..).await.unwrap();
            assert_eq!(entries.first().map(|e| e.log_id.index), Some(3));
        }

        let mut store = RaftDbStore::open(&path).await.unwrap();
        let state = store.get_log_state().await.unwrap();
        assert_eq!(state.last_purged_log_id, Some(log_id(2, 2)));
        assert_eq!(state.last_log_id, Some(log_id(2, 4)));
    }

    #[tokio::test]
    async fn test_synced_truncate_survives_reopen() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("raft.db");

        {
            let mut store = RaftDbStore::open(&path).await.unwrap();
            seed(&store, &(1..=6).map(|i| entry(4, i)).collect::<Vec<_>>());
            store.truncate(log_id(4, 5)).await.unwrap();
            store.save_vote(&Vote::new(4, 7)).await.unwrap();
        }

        let mut store = RaftDbStore::open(&path).await.unwrap();
        let state = store.get_log_state().await.unwrap();
        assert_eq!(state.last_log_id, Some(log_id(4, 4)));
        assert_eq!(store.read_vote().await.unwrap(), Some(Vote::new(4, 7)));
        assert!(store.try_get_log_entries(5..).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge_everything_keeps_last_log_id() {
        let (mut store, _tmp_dir) = open_store().await;
        seed(&store, &(1..=3).map(|i| entry(1, i)).collect::<Vec<_>>());
        *store.last_log_id.write().await = Some(log_id(1, 3));

        store.purge(log_id(1, 3)).await.unwrap();

        let state = store.get_log_state().await.unwrap();
        assert_eq!(state.last_purged_log_id, Some(log_id(1, 3)));
        assert_eq!(state.last_log_id, Some(log_id(1, 3)));
        assert!(store.try_get_log_entries(..).await.unwrap().is_empty());
    }
}
