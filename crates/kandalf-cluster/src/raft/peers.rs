// JSON file peer registry
// Persists the `host:port` addresses of the cluster members under the data directory

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use openraft::BasicNode;
use parking_lot::RwLock;
use tracing::debug;

use super::types::{NodeId, node_id_for};

/// Peer set stored as a JSON array of addresses
pub struct JsonPeerStore {
    path: PathBuf,
    peers: RwLock<Vec<String>>,
}

impl JsonPeerStore {
    /// Open the registry, loading the file if it already exists
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let peers = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };

        Ok(Self {
            path,
            peers: RwLock::new(peers),
        })
    }

    /// Replace the stored peer set
    ///
    /// Blank and duplicate addresses are dropped; order is otherwise kept.
    pub fn set_peers(&self, peers: &[String]) -> io::Result<()> {
        let mut unique: Vec<String> = Vec::with_capacity(peers.len());
        for peer in peers.iter().map(|p| p.trim()) {
            if !peer.is_empty() && !unique.iter().any(|p| p == peer) {
                unique.push(peer.to_string());
            }
        }

        let bytes = serde_json::to_vec(&unique).map_err(io::Error::other)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, bytes)?;
        fs::rename(&tmp_path, &self.path)?;

        debug!(path = %self.path.display(), peers = ?unique, "Peer set stored");
        *self.peers.write() = unique;
        Ok(())
    }

    pub fn peers(&self) -> Vec<String> {
        self.peers.read().clone()
    }

    /// Peer set keyed by node ID, as the consensus engine expects it
    pub fn members(&self) -> BTreeMap<NodeId, BasicNode> {
        self.peers
            .read()
            .iter()
            .map(|addr| (node_id_for(addr), BasicNode::new(addr)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    fn addrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_missing_file_is_empty() {
        let tmp_dir = TempDir::new().unwrap();
        let store = JsonPeerStore::open(tmp_dir.path().join("peers.json")).unwrap();

        assert!(store.peers().is_empty());
        assert!(store.members().is_empty());
    }

    #[test]
    fn test_set_peers_persists() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("peers.json");

        let store = JsonPeerStore::open(&path).unwrap();
        store
            .set_peers(&addrs(&["10.0.0.1:11291", "10.0.0.2:11291"]))
            .unwrap();

        let reopened = JsonPeerStore::open(&path).unwrap();
        assert_eq!(
            reopened.peers(),
            addrs(&["10.0.0.1:11291", "10.0.0.2:11291"])
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_set_peers_drops_duplicates_and_blanks() {
        let tmp_dir = TempDir::new().unwrap();
        let store = JsonPeerStore::open(tmp_dir.path().join("peers.json")).unwrap();

        store
            .set_peers(&addrs(&["a:1", " ", "b:2", "a:1", " b:2 "]))
            .unwrap();
        assert_eq!(store.peers(), addrs(&["a:1", "b:2"]));
    }

    #[test]
    fn test_members_keyed_by_node_id() {
        let tmp_dir = TempDir::new().unwrap();
        let store = JsonPeerStore::open(tmp_dir.path().join("peers.json")).unwrap();
        store.set_peers(&addrs(&["a:1", "b:2"])).unwrap();

        let members = store.members();
        assert_eq!(members.len(), 2);
        assert_eq!(members[&node_id_for("a:1")].addr, "a:1");
        assert_eq!(members[&node_id_for("b:2")].addr, "b:2");
    }

    #[test]
    fn test_corrupted_file_rejected() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("peers.json");
        fs::write(&path, b"[not json").unwrap();

        let err = JsonPeerStore::open(&path).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
