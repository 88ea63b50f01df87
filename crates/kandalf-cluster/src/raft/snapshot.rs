// File-backed snapshot storage
// Keeps the most recent state machine snapshots on disk and prunes older ones

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::types::SnapshotMeta;

const META_FILE: &str = "meta.json";
const STATE_FILE: &str = "state.bin";
const TMP_SUFFIX: &str = ".tmp";

/// Snapshot store rooted at a directory
///
/// Each snapshot is a sub-directory named `<index>-<millis>` holding the
/// snapshot metadata and the serialized state. Names sort by last included
/// log index, so the last name is the newest snapshot whatever the wall clock
/// did in between.
///
/// All methods do blocking file I/O.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
    retain: usize,
}

impl FileSnapshotStore {
    /// Open the store, creating the directory if needed
    pub fn new<P: AsRef<Path>>(dir: P, retain: usize) -> io::Result<Self> {
        if retain < 1 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "must retain at least one snapshot",
            ));
        }

        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        Ok(Self { dir, retain })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a snapshot, then prune down to the retain count
    pub fn create(&self, meta: &SnapshotMeta, data: &[u8]) -> io::Result<PathBuf> {
        let name = format!(
            "{:020}-{:016}",
            meta.last_log_id.map(|l| l.index).unwrap_or(0),
            chrono::Utc::now().timestamp_millis()
        );
        let tmp_path = self.dir.join(format!("{}{}", name, TMP_SUFFIX));
        let final_path = self.dir.join(&name);

        fs::create_dir_all(&tmp_path)?;
        let meta_bytes = serde_json::to_vec(meta).map_err(io::Error::other)?;
        fs::write(tmp_path.join(META_FILE), meta_bytes)?;
        fs::write(tmp_path.join(STATE_FILE), data)?;
        fs::rename(&tmp_path, &final_path)?;

        info!(
            snapshot_id = %meta.snapshot_id,
            path = %final_path.display(),
            bytes = data.len(),
            "Snapshot persisted"
        );

        self.prune()?;
        Ok(final_path)
    }

    /// Names of complete snapshots, oldest first
    pub fn list(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_dir() {
                continue;
            }
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(TMP_SUFFIX) {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    /// Newest snapshot that can be read back
    ///
    /// Unreadable snapshots are skipped in favour of the next older one.
    pub fn latest(&self) -> io::Result<Option<(SnapshotMeta, Vec<u8>)>> {
        for name in self.list()?.into_iter().rev() {
            match self.load(&name) {
                Ok(snapshot) => return Ok(Some(snapshot)),
                Err(e) => warn!(snapshot = %name, error = %e, "Skipping unreadable snapshot"),
            }
        }
        Ok(None)
    }

    fn load(&self, name: &str) -> io::Result<(SnapshotMeta, Vec<u8>)> {
        let path = self.dir.join(name);
        let meta_bytes = fs::read(path.join(META_FILE))?;
        let meta: SnapshotMeta = serde_json::from_slice(&meta_bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let data = fs::read(path.join(STATE_FILE))?;
        Ok((meta, data))
    }

    fn prune(&self) -> io::Result<()> {
        let names = self.list()?;
        if names.len() <= self.retain {
            return Ok(());
        }

        let excess = names.len() - self.retain;
        for name in &names[..excess] {
            fs::remove_dir_all(self.dir.join(name))?;
            debug!(snapshot = %name, "Pruned snapshot");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use openraft::{CommittedLeaderId, LogId};
    use tempfile::TempDir;

    use crate::raft::types::StoredMembership;

    fn meta(index: u64) -> SnapshotMeta {
        SnapshotMeta {
            last_log_id: Some(LogId::new(CommittedLeaderId::new(1, 7), index)),
            last_membership: StoredMembership::default(),
            snapshot_id: format!("snapshot-{}", index),
        }
    }

    #[test]
    fn test_zero_retention_rejected() {
        let tmp_dir = TempDir::new().unwrap();
        let err = FileSnapshotStore::new(tmp_dir.path(), 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_empty_store_has_no_latest() {
        let tmp_dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(tmp_dir.path().join("snapshots"), 2).unwrap();

        assert!(store.dir().exists());
        assert!(store.latest().unwrap().is_none());
    }

    #[test]
    fn test_create_and_read_back() {
        let tmp_dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(tmp_dir.path(), 2).unwrap();

        store.create(&meta(10), b"state-10").unwrap();

        let (loaded, data) = store.latest().unwrap().unwrap();
        assert_eq!(loaded.snapshot_id, "snapshot-10");
        assert_eq!(loaded.last_log_id.map(|l| l.index), Some(10));
        assert_eq!(data, b"state-10");
    }

    #[test]
    fn test_retains_most_recent() {
        let tmp_dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(tmp_dir.path(), 2).unwrap();

        for index in [1, 2, 3] {
            store.create(&meta(index), b"x").unwrap();
        }

        let names = store.list().unwrap();
        assert_eq!(names.len(), 2);

        let (latest, _) = store.latest().unwrap().unwrap();
        assert_eq!(latest.snapshot_id, "snapshot-3");
    }

    #[test]
    fn test_newest_is_highest_index_not_latest_written() {
        let tmp_dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(tmp_dir.path(), 1).unwrap();

        store.create(&meta(50), b"fifty").unwrap();
        store.create(&meta(20), b"twenty").unwrap();

        let names = store.list().unwrap();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with(&format!("{:020}-", 50)));

        let (latest, data) = store.latest().unwrap().unwrap();
        assert_eq!(latest.snapshot_id, "snapshot-50");
        assert_eq!(data, b"fifty");
    }

    #[test]
    fn test_corrupted_latest_is_skipped() {
        let tmp_dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(tmp_dir.path(), 3).unwrap();

        store.create(&meta(1), b"good").unwrap();
        let newest = store.create(&meta(2), b"bad").unwrap();
        fs::write(newest.join(META_FILE), b"{not json").unwrap();

        let (latest, data) = store.latest().unwrap().unwrap();
        assert_eq!(latest.snapshot_id, "snapshot-1");
        assert_eq!(data, b"good");
    }

    #[test]
    fn test_incomplete_snapshots_are_ignored() {
        let tmp_dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(tmp_dir.path(), 2).unwrap();

        fs::create_dir_all(tmp_dir.path().join(format!("9999999999999999-1{}", TMP_SUFFIX)))
            .unwrap();
        fs::write(tmp_dir.path().join("stray-file"), b"").unwrap();

        assert!(store.list().unwrap().is_empty());
    }
}
