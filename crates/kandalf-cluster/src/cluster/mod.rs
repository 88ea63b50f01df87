// Cluster coordination: leadership notification, watcher and lifecycle

pub mod leadership;
pub mod lifecycle;
pub mod watcher;

pub use leadership::{LeaderReceiver, LeaderSender, leader_channel, observe_leadership};
pub use lifecycle::{Cluster, INFINITE_CYCLE_TIMEOUT};
pub use watcher::{ActiveWorker, LeadershipWatcher, WatchOutcome};
