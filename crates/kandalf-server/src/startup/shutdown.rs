//! Graceful shutdown handling
//!
//! Translates Ctrl+C / SIGTERM into the process [`ShutdownSignal`] and bounds
//! how long the process waits for its tasks afterwards.

use std::time::Duration;

use kandalf_common::{ShutdownSignal, TaskGroup};
use tracing::{error, info, warn};

/// Trigger `shutdown` on Ctrl+C or SIGTERM
pub fn install_signal_handler(shutdown: ShutdownSignal) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }

        shutdown.shutdown();
    });
}

/// Wait for every task of `tasks`, giving up after `timeout`
///
/// Returns `false` when some tasks were still running at the deadline.
pub async fn drain_tasks(tasks: &TaskGroup, timeout: Duration) -> bool {
    info!("Waiting up to {:?} for running tasks to finish...", timeout);

    match tokio::time::timeout(timeout, tasks.wait()).await {
        Ok(()) => true,
        Err(_) => {
            warn!("Tasks still running after {:?}, giving up", timeout);
            false
        }
    }
}
