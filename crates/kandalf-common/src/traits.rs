//! Worker contract
//!
//! A worker is the stateful process that must only run on the cluster
//! leader. The cluster coordinator builds workers through a
//! [`WorkerFactory`] and starts them with [`start_worker`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::lifecycle::{ShutdownSignal, TaskGroup};

/// Lifecycle contract of a leader-only worker
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Run until stopped or until the shutdown signal fires
    async fn run(&self, shutdown: ShutdownSignal) -> anyhow::Result<()>;

    /// Ask a running worker to stop
    fn stop(&self);
}

/// Builds a fresh worker for each leadership acquisition
pub type WorkerFactory = Arc<dyn Fn() -> Arc<dyn Worker> + Send + Sync>;

/// Start a worker as a task of the given group
pub fn start_worker(worker: Arc<dyn Worker>, tasks: &TaskGroup, shutdown: ShutdownSignal) {
    tasks.spawn(async move {
        info!(worker = worker.name(), "Worker started");
        match worker.run(shutdown).await {
            Ok(()) => info!(worker = worker.name(), "Worker stopped"),
            Err(e) => error!(worker = worker.name(), error = %e, "Worker failed"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::lifecycle::RunnableWorker;

    struct CountingWorker {
        runnable: RunnableWorker,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Worker for CountingWorker {
        fn name(&self) -> &str {
            "counting"
        }

        async fn run(&self, shutdown: ShutdownSignal) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            while self.runnable.is_working() && !shutdown.is_shutdown() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Ok(())
        }

        fn stop(&self) {
            self.runnable.stop();
        }
    }

    #[tokio::test]
    async fn test_start_worker_runs_until_stopped() {
        let worker = Arc::new(CountingWorker {
            runnable: RunnableWorker::new(),
            runs: AtomicUsize::new(0),
        });
        let tasks = TaskGroup::new();

        start_worker(worker.clone(), &tasks, ShutdownSignal::new());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(tasks.active(), 1);

        worker.stop();
        tokio::time::timeout(Duration::from_secs(1), tasks.wait())
            .await
            .expect("worker should exit after stop");
        assert_eq!(worker.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_worker_honours_shutdown() {
        let worker = Arc::new(CountingWorker {
            runnable: RunnableWorker::new(),
            runs: AtomicUsize::new(0),
        });
        let tasks = TaskGroup::new();
        let shutdown = ShutdownSignal::new();

        start_worker(worker, &tasks, shutdown.clone());
        shutdown.shutdown();

        tokio::time::timeout(Duration::from_secs(1), tasks.wait())
            .await
            .expect("worker should exit on shutdown");
    }
}
