//! Relay worker
//!
//! Runs the configured message relay as a child process for as long as this
//! node holds the worker slot.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use kandalf_common::{RunnableWorker, ShutdownSignal, Worker, WorkerFactory};
use tokio::process::Command;
use tracing::{info, warn};

/// How often the stop flag is checked while the relay runs
const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct CommandWorker {
    command: Option<String>,
    args: Vec<String>,
    runnable: RunnableWorker,
    poll_interval: Duration,
}

impl CommandWorker {
    /// Worker for `command`; with no command it idles until stopped
    pub fn new(command: Option<String>, args: Vec<String>) -> Self {
        Self {
            command,
            args,
            runnable: RunnableWorker::new(),
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Factory building a fresh worker on every leadership acquisition
    pub fn factory(command: Option<String>, args: Vec<String>) -> WorkerFactory {
        Arc::new(move || Arc::new(CommandWorker::new(command.clone(), args.clone())) as Arc<dyn Worker>)
    }

    fn should_run(&self, shutdown: &ShutdownSignal) -> bool {
        self.runnable.is_working() && !shutdown.is_shutdown()
    }

    async fn idle(&self, shutdown: &ShutdownSignal) {
        info!("No relay command configured, worker idling");
        while self.should_run(shutdown) {
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl Worker for CommandWorker {
    fn name(&self) -> &str {
        "relay"
    }

    async fn run(&self, shutdown: ShutdownSignal) -> anyhow::Result<()> {
        let Some(command) = &self.command else {
            self.idle(&shutdown).await;
            return Ok(());
        };

        let mut child = Command::new(command)
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start relay command '{}'", command))?;
        info!(command = %command, args = ?self.args, pid = ?child.id(), "Relay process started");

        loop {
            tokio::select! {
                status = child.wait() => {
                    let status = status.context("failed to wait for relay process")?;
                    if self.should_run(&shutdown) {
                        warn!(%status, "Relay process exited while the worker was active");
                        anyhow::bail!("relay process exited with {}", status);
                    }
                    return Ok(());
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    if !self.should_run(&shutdown) {
                        info!(pid = ?child.id(), "Stopping relay process");
                        child.kill().await.context("failed to kill relay process")?;
                        return Ok(());
                    }
                }
            }
        }
    }

    fn stop(&self) {
        self.runnable.stop();
    }
}
