// Leadership watcher
// Starts the leader-only worker when this node is elected

use std::sync::Arc;

use kandalf_common::{ShutdownSignal, TaskGroup, Worker, WorkerFactory, start_worker};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::leadership::LeaderReceiver;

/// Lock-protected slot holding the worker started on this node
#[derive(Clone, Default)]
pub struct ActiveWorker {
    slot: Arc<Mutex<Option<Arc<dyn Worker>>>>,
}

impl ActiveWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `worker`, returning the one it replaces
    pub fn replace(&self, worker: Arc<dyn Worker>) -> Option<Arc<dyn Worker>> {
        self.slot.lock().replace(worker)
    }

    pub fn is_active(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Empty the slot and ask the worker it held to stop
    pub fn stop(&self) {
        let worker = self.slot.lock().take();
        if let Some(worker) = worker {
            info!(worker = worker.name(), "Stopping active worker");
            worker.stop();
        }
    }
}

/// How a [`LeadershipWatcher`] finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The first event was "became leader" and a worker was started
    WorkerStarted,
    /// The first event was "not leader"; nothing was started
    NotLeader,
    /// The channel closed before any event arrived
    ChannelClosed,
}

/// Reacts to the first leadership event of this node, then ends
///
/// Later transitions, including stepping down, are not observed: a worker
/// started here keeps running until it is stopped through [`ActiveWorker`]
/// or the shutdown signal.
pub struct LeadershipWatcher {
    leader_rx: LeaderReceiver,
    factory: WorkerFactory,
    active: ActiveWorker,
    tasks: TaskGroup,
    shutdown: ShutdownSignal,
}

impl LeadershipWatcher {
    pub fn new(
        leader_rx: LeaderReceiver,
        factory: WorkerFactory,
        active: ActiveWorker,
        tasks: TaskGroup,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            leader_rx,
            factory,
            active,
            tasks,
            shutdown,
        }
    }

    pub async fn watch(mut self) -> WatchOutcome {
        match self.leader_rx.recv().await {
            Some(true) => {
                let worker = (self.factory)();
                info!(worker = worker.name(), "Leadership acquired, starting worker");

                if let Some(previous) = self.active.replace(worker.clone()) {
                    info!(worker = previous.name(), "Stopping previously started worker");
                    previous.stop();
                }

                start_worker(worker, &self.tasks, self.shutdown.clone());
                WatchOutcome::WorkerStarted
            }
            Some(false) => {
                debug!("First leadership event is not leader, nothing to start");
                WatchOutcome::NotLeader
            }
            None => {
                debug!("Leadership channel closed before any event");
                WatchOutcome::ChannelClosed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use kandalf_common::RunnableWorker;

    use crate::cluster::leadership::leader_channel;

    struct TestWorker {
        runnable: RunnableWorker,
    }

    #[async_trait]
    impl Worker for TestWorker {
        fn name(&self) -> &str {
            "test"
        }

        async fn run(&self, shutdown: ShutdownSignal) -> anyhow::Result<()> {
            while self.runnable.is_working() && !shutdown.is_shutdown() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Ok(())
        }

        fn stop(&self) {
            self.runnable.stop();
        }
    }

    fn counting_factory() -> (WorkerFactory, Arc<AtomicUsize>) {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let factory: WorkerFactory = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Arc::new(TestWorker {
                runnable: RunnableWorker::new(),
            }) as Arc<dyn Worker>
        });
        (factory, built)
    }

    #[tokio::test]
    async fn test_leader_event_starts_one_worker() {
        let (tx, rx) = leader_channel();
        let (factory, built) = counting_factory();
        let active = ActiveWorker::new();
        let tasks = TaskGroup::new();
        let shutdown = ShutdownSignal::new();

        let watcher =
            LeadershipWatcher::new(rx, factory, active.clone(), tasks.clone(), shutdown.clone());
        tx.notify(true);

        assert_eq!(watcher.watch().await, WatchOutcome::WorkerStarted);
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(active.is_active());

        // The watcher is gone; a later step-down does not stop the worker
        tx.notify(false);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(active.is_active());
        assert_eq!(tasks.active(), 1);

        shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(1), tasks.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_not_leader_event_starts_nothing() {
        let (tx, rx) = leader_channel();
        let (factory, built) = counting_factory();
        let active = ActiveWorker::new();

        let watcher = LeadershipWatcher::new(
            rx,
            factory,
            active.clone(),
            TaskGroup::new(),
            ShutdownSignal::new(),
        );
        tx.notify(false);

        assert_eq!(watcher.watch().await, WatchOutcome::NotLeader);
        assert_eq!(built.load(Ordering::SeqCst), 0);
        assert!(!active.is_active());
    }

    #[tokio::test]
    async fn test_closed_channel() {
        let (tx, rx) = leader_channel();
        let (factory, _built) = counting_factory();
        drop(tx);

        let watcher = LeadershipWatcher::new(
            rx,
            factory,
            ActiveWorker::new(),
            TaskGroup::new(),
            ShutdownSignal::new(),
        );
        assert_eq!(watcher.watch().await, WatchOutcome::ChannelClosed);
    }

    #[tokio::test]
    async fn test_previous_worker_is_stopped() {
        let (factory, _built) = counting_factory();
        let active = ActiveWorker::new();
        let tasks = TaskGroup::new();
        let shutdown = ShutdownSignal::new();

        for _ in 0..2 {
            let (tx, rx) = leader_channel();
            tx.notify(true);
            let watcher = LeadershipWatcher::new(
                rx,
                factory.clone(),
                active.clone(),
                tasks.clone(),
                shutdown.clone(),
            );
            assert_eq!(watcher.watch().await, WatchOutcome::WorkerStarted);
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(tasks.active(), 1);

        active.stop();
        assert!(!active.is_active());
        tokio::time::timeout(Duration::from_secs(1), tasks.wait())
            .await
            .unwrap();
    }
}
