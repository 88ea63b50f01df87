// Cluster settings
// Bind address, storage layout and timing of the consensus participant

use std::path::PathBuf;
use std::time::Duration;

use config::Config;
use kandalf_common::parse_duration;
use tracing::warn;

/// Default TCP port of the consensus transport
pub const DEFAULT_BIND_PORT: u16 = 11291;

/// Default root for the log store, snapshots and peer registry
pub const DEFAULT_DATA_DIR: &str = "/var/lib/kandalf";

/// Default size of the transport connection pool
pub const DEFAULT_MAX_POOL: usize = 3;

/// Default number of retained snapshots
pub const DEFAULT_NB_SNAPSHOT: usize = 2;

/// Default RPC timeout, also used when the configured value does not parse
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

pub const DEFAULT_ELECTION_TIMEOUT: Duration = Duration::from_secs(1);

pub const DEFAULT_SNAPSHOT_THRESHOLD: u64 = 8192;

/// Log and stable store file under the data directory
pub const RAFT_DB_FILE: &str = "raft.db";

/// Snapshot directory under the data directory
pub const SNAPSHOT_DIR: &str = "snapshots";

/// Peer registry file under the data directory
pub const PEERS_FILE: &str = "peers.json";

/// Settings of the consensus participant
#[derive(Clone, Debug)]
pub struct ClusterSettings {
    /// Address to bind the transport to; discovered from the interfaces when unset
    pub bind_host: Option<String>,

    pub bind_port: u16,

    /// Root of all persisted cluster state
    pub data_dir: PathBuf,

    /// Maximum idle connections kept per peer
    pub max_pool: usize,

    /// Number of most recent snapshots to retain
    pub nb_snapshot: usize,

    /// Timeout of a single transport RPC
    pub timeout: Duration,

    pub heartbeat_interval: Duration,

    /// Minimum election timeout; the maximum is twice this value
    pub election_timeout: Duration,

    /// Log entries since the last snapshot before a new one is built
    pub snapshot_threshold: u64,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            bind_host: None,
            bind_port: DEFAULT_BIND_PORT,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            max_pool: DEFAULT_MAX_POOL,
            nb_snapshot: DEFAULT_NB_SNAPSHOT,
            timeout: DEFAULT_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            election_timeout: DEFAULT_ELECTION_TIMEOUT,
            snapshot_threshold: DEFAULT_SNAPSHOT_THRESHOLD,
        }
    }
}

impl ClusterSettings {
    /// Read the `cluster.*` keys, falling back to defaults for missing or invalid values
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();

        let bind_host = config
            .get_string("cluster.bind_host")
            .ok()
            .map(|host| host.trim().to_string())
            .filter(|host| !host.is_empty());

        let data_dir = config
            .get_string("cluster.data_dir")
            .ok()
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        Self {
            bind_host,
            bind_port: int_or_default(config, "cluster.bind_port", defaults.bind_port),
            data_dir,
            max_pool: int_or_default(config, "cluster.max_pool", defaults.max_pool),
            nb_snapshot: int_or_default(config, "cluster.nb_snapshot", defaults.nb_snapshot),
            timeout: duration_or_default(config, "cluster.timeout", defaults.timeout),
            heartbeat_interval: duration_or_default(
                config,
                "cluster.heartbeat_interval",
                defaults.heartbeat_interval,
            ),
            election_timeout: duration_or_default(
                config,
                "cluster.election_timeout",
                defaults.election_timeout,
            ),
            snapshot_threshold: int_or_default(
                config,
                "cluster.snapshot_threshold",
                defaults.snapshot_threshold,
            ),
        }
    }

    /// Seed peer list from `cluster.nodes`
    ///
    /// Accepts either a list or a comma separated string, the latter being
    /// what environment variables produce.
    pub fn nodes_from_config(config: &Config) -> Vec<String> {
        let nodes = match config.get_array("cluster.nodes") {
            Ok(values) => values
                .into_iter()
                .filter_map(|value| value.into_string().ok())
                .collect(),
            Err(_) => config
                .get_string("cluster.nodes")
                .map(|raw| raw.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
        };

        nodes
            .into_iter()
            .map(|node: String| node.trim().to_string())
            .filter(|node| !node.is_empty())
            .collect()
    }

    /// `host:port` string for the given host, bracketing IPv6 literals
    pub fn bind_string(&self, host: &str) -> String {
        host_port(host, self.bind_port)
    }

    /// Path of the combined log and stable store
    pub fn raft_db_path(&self) -> PathBuf {
        self.data_dir.join(RAFT_DB_FILE)
    }

    /// Root of the snapshot store
    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_DIR)
    }

    /// Path of the peer registry file
    pub fn peers_path(&self) -> PathBuf {
        self.data_dir.join(PEERS_FILE)
    }

    /// Convert to openraft Config
    pub fn to_openraft_config(&self) -> openraft::Config {
        let election_timeout_ms = self.election_timeout.as_millis() as u64;
        openraft::Config {
            cluster_name: "kandalf".to_string(),
            election_timeout_min: election_timeout_ms,
            election_timeout_max: election_timeout_ms * 2,
            heartbeat_interval: self.heartbeat_interval.as_millis() as u64,
            install_snapshot_timeout: self.timeout.as_millis() as u64,
            snapshot_policy: openraft::SnapshotPolicy::LogsSinceLast(self.snapshot_threshold),
            ..Default::default()
        }
    }
}

/// Join a host and a port, bracketing IPv6 literals
pub fn host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

fn duration_or_default(config: &Config, key: &str, default: Duration) -> Duration {
    match config.get_string(key) {
        Ok(raw) => parse_duration(&raw).unwrap_or_else(|| {
            warn!(key, value = %raw, "Invalid duration, falling back to {:?}", default);
            default
        }),
        Err(_) => default,
    }
}

fn int_or_default<T>(config: &Config, key: &str, default: T) -> T
where
    T: TryFrom<i64> + Copy,
{
    match config.get_int(key) {
        Ok(raw) => T::try_from(raw).unwrap_or_else(|_| {
            warn!(key, value = raw, "Value out of range, using default");
            default
        }),
        Err(_) => default,
    }
}
