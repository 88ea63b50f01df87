// Cluster coordinator lifecycle
// Runs the leadership watcher and blocks until the liveness flag is cleared

use std::sync::Arc;
use std::time::Duration;

use kandalf_common::{RunnableWorker, ShutdownSignal, TaskGroup, WorkerFactory};
use tracing::{debug, info};

use super::leadership::LeaderReceiver;
use super::watcher::{ActiveWorker, LeadershipWatcher};
use crate::raft::node::ConsensusParticipant;

/// Interval between two checks of the liveness flag
pub const INFINITE_CYCLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Leader-only worker coordinator of one node
pub struct Cluster {
    participant: Option<Arc<ConsensusParticipant>>,
    leader_rx: LeaderReceiver,
    factory: WorkerFactory,
    active: ActiveWorker,
    runnable: RunnableWorker,
    cycle_interval: Duration,
}

impl Cluster {
    pub fn new(participant: Arc<ConsensusParticipant>, factory: WorkerFactory) -> Self {
        let leader_rx = participant.leader_ch();
        Self {
            participant: Some(participant),
            ..Self::from_channel(leader_rx, factory)
        }
    }

    /// Coordinator driven by an arbitrary leadership channel
    pub fn from_channel(leader_rx: LeaderReceiver, factory: WorkerFactory) -> Self {
        Self {
            participant: None,
            leader_rx,
            factory,
            active: ActiveWorker::new(),
            runnable: RunnableWorker::new(),
            cycle_interval: INFINITE_CYCLE_TIMEOUT,
        }
    }

    pub fn with_cycle_interval(mut self, interval: Duration) -> Self {
        self.cycle_interval = interval;
        self
    }

    pub fn participant(&self) -> Option<&Arc<ConsensusParticipant>> {
        self.participant.as_ref()
    }

    pub fn active_worker(&self) -> &ActiveWorker {
        &self.active
    }

    pub fn is_working(&self) -> bool {
        self.runnable.is_working()
    }

    /// Clear the liveness flag; `run` returns on its next check
    pub fn stop(&self) {
        self.runnable.stop();
    }

    /// Start the watcher, then poll the liveness flag until it is cleared
    ///
    /// Workers are started on `tasks` with `shutdown`. Stopping is cooperative
    /// for the loop itself, but a watcher still waiting for its first
    /// leadership event when the loop ends is aborted rather than left
    /// blocked: a leadership change after `run` returns never starts a worker.
    pub async fn run(&self, tasks: TaskGroup, shutdown: ShutdownSignal) {
        let watcher = LeadershipWatcher::new(
            self.leader_rx.clone(),
            self.factory.clone(),
            self.active.clone(),
            tasks,
            shutdown,
        );
        let watch_handle = tokio::spawn(async move {
            let outcome = watcher.watch().await;
            debug!(?outcome, "Leadership watcher finished");
        });

        info!(interval = ?self.cycle_interval, "Cluster coordinator running");
        while self.runnable.is_working() {
            tokio::time::sleep(self.cycle_interval).await;
        }

        if !watch_handle.is_finished() {
            watch_handle.abort();
        }
        info!("Cluster coordinator stopped");
    }
}
