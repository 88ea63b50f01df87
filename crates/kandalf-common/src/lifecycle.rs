//! Process lifecycle primitives
//!
//! - [`ShutdownSignal`]: process-wide stop notification
//! - [`RunnableWorker`]: cooperative liveness flag polled by long-running loops
//! - [`TaskGroup`]: joins every task spawned on behalf of the process

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

/// Shutdown signal sender and receiver
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownSignal {
    /// Create a new shutdown signal with a broadcast channel
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a receiver for shutdown notifications
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Trigger shutdown. Repeated calls are no-ops.
    pub fn shutdown(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            let _ = self.sender.send(());
        }
    }

    /// Check if shutdown has been triggered
    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is triggered
    pub async fn wait(&self) {
        let mut receiver = self.subscribe();
        if self.is_shutdown() {
            return;
        }
        let _ = receiver.recv().await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Liveness flag of a long-running component
///
/// Starts out working; [`RunnableWorker::stop`] clears it and the owning loop
/// exits the next time it checks.
#[derive(Debug, Clone)]
pub struct RunnableWorker {
    working: Arc<AtomicBool>,
}

impl RunnableWorker {
    pub fn new() -> Self {
        Self {
            working: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_working(&self) -> bool {
        self.working.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.working.store(false, Ordering::SeqCst);
    }
}

impl Default for RunnableWorker {
    fn default() -> Self {
        Self::new()
    }
}

/// Group of spawned tasks that can be awaited together
#[derive(Clone, Default)]
pub struct TaskGroup {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task tracked by this group
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.handles.lock().push(handle);
    }

    /// Number of tracked tasks that have not finished yet
    pub fn active(&self) -> usize {
        self.handles
            .lock()
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Wait for every tracked task, including ones spawned while waiting
    pub async fn wait(&self) {
        loop {
            let batch = std::mem::take(&mut *self.handles.lock());
            if batch.is_empty() {
                return;
            }

            for handle in batch {
                if let Err(e) = handle.await
                    && e.is_panic()
                {
                    warn!("Task in group panicked: {}", e);
                }
            }
        }
    }
}
