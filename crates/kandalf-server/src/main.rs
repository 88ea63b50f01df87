//! Main entry point for the Kandalf server.
//!
//! Bootstraps the consensus participant, then runs the relay worker on this
//! node whenever it is elected cluster leader.

use std::sync::Arc;
use std::time::Duration;

use kandalf_cluster::{Cluster, ConsensusParticipant};
use kandalf_common::{ShutdownSignal, TaskGroup};
use kandalf_server::{Configuration, startup};
use tracing::{error, info};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let configuration = Configuration::new()?;
    let _logging_guard = startup::init_logging(&configuration.logging_config())?;

    let settings = configuration.cluster_settings();
    let nodes = configuration.nodes();
    info!(
        data_dir = %settings.data_dir.display(),
        bind_port = settings.bind_port,
        peers = ?nodes,
        "Starting kandalf"
    );

    let participant = match ConsensusParticipant::bootstrap(&settings, &nodes).await {
        Ok(participant) => Arc::new(participant),
        Err(e) => {
            error!(stage = e.stage(), error = %e, "Failed to bootstrap cluster");
            return Err(e.into());
        }
    };

    let shutdown = ShutdownSignal::new();
    startup::install_signal_handler(shutdown.clone());

    let tasks = TaskGroup::new();
    let cluster = Arc::new(Cluster::new(participant.clone(), configuration.worker_factory()));

    let runner = cluster.clone();
    let (run_tasks, run_shutdown) = (tasks.clone(), shutdown.clone());
    let run_handle = tokio::spawn(async move { runner.run(run_tasks, run_shutdown).await });

    shutdown.wait().await;

    cluster.stop();
    cluster.active_worker().stop();
    if let Err(e) = run_handle.await {
        error!("Cluster loop ended abnormally: {}", e);
    }
    participant.shutdown().await;
    startup::drain_tasks(&tasks, SHUTDOWN_TIMEOUT).await;

    info!("Kandalf stopped");
    Ok(())
}
