// Leadership notification channel
// Carries "became leader" / "lost leadership" events from the engine to the watcher

use openraft::ServerState;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::raft::types::{NodeId, RaftMetrics};

/// Create a single-slot leadership channel
///
/// A new value overwrites one that was not received yet. Receivers cloned
/// after a send still see that value.
pub fn leader_channel() -> (LeaderSender, LeaderReceiver) {
    let (tx, rx) = watch::channel(None);
    (LeaderSender { tx }, LeaderReceiver { rx })
}

/// Sending half of the leadership channel
#[derive(Debug)]
pub struct LeaderSender {
    tx: watch::Sender<Option<bool>>,
}

impl LeaderSender {
    /// Publish a leadership state; `true` means this node became leader
    pub fn notify(&self, is_leader: bool) {
        self.tx.send_replace(Some(is_leader));
    }
}

/// Receiving half of the leadership channel
#[derive(Debug, Clone)]
pub struct LeaderReceiver {
    rx: watch::Receiver<Option<bool>>,
}

impl LeaderReceiver {
    /// Wait for the next leadership value
    ///
    /// Returns `None` once the sender is gone and nothing is pending.
    pub async fn recv(&mut self) -> Option<bool> {
        loop {
            if self.rx.changed().await.is_err() {
                return None;
            }
            if let Some(is_leader) = *self.rx.borrow_and_update() {
                return Some(is_leader);
            }
        }
    }
}

/// Follow the engine metrics and publish leadership transitions
///
/// Only changes are sent: `true` on becoming leader, `false` on stepping
/// down. The task ends when the engine stops publishing metrics.
pub fn observe_leadership(
    node_id: NodeId,
    mut metrics: watch::Receiver<RaftMetrics>,
    sender: LeaderSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut was_leader = false;

        loop {
            let (is_leader, term) = {
                let current = metrics.borrow_and_update();
                (current.state == ServerState::Leader, current.current_term)
            };

            if is_leader != was_leader {
                if is_leader {
                    info!(node_id, term, "This node became the cluster leader");
                } else {
                    info!(node_id, term, "This node is no longer the cluster leader");
                }
                sender.notify(is_leader);
                was_leader = is_leader;
            }

            if metrics.changed().await.is_err() {
                debug!(node_id, "Engine metrics closed, leadership observer exiting");
                return;
            }
        }
    })
}
